//! # Transport Writer/Reader
//!
//! Framed, at-least-once message passing between coordinator nodes.
//!
//! ## Contracts
//!
//! - Every message travels in a [`TransportEnvelope`] inside a
//!   length-prefixed frame.
//! - Delivery is at-least-once; receivers deduplicate on `message_id`
//!   within a bounded window.
//! - No ordering across senders; per-sender FIFO is preserved and is relied
//!   upon for assembled → delegated → endorsed sequences from one origin.
//! - Malformed frames and unknown message types are logged and dropped with
//!   no state change.

pub mod adapters;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod messages;
pub mod ports;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame};
pub use config::TransportConfig;
pub use dedup::DeliveryWindow;
pub use errors::TransportError;
pub use messages::{
    CoordinatorMessage, DelegationAck, DelegationRequest, EndorsementRequestMsg,
    EndorsementResponseMsg, RevertReason, TransactionAssembled, TransactionBlocked,
    TransactionConfirmed, TransactionDelegated, TransactionEndorsed, TransactionReverted,
};
pub use ports::WireTransport;
pub use reader::TransportReader;
pub use writer::TransportWriter;

pub use shared_types::TransportEnvelope;
