//! # Sequencer
//!
//! The event-driven state machine that owns one privacy contract instance
//! on one node. It consumes a serialized event queue, moves transactions
//! through their lifecycle, and emits outbound work as commands.
//!
//! ## Structure
//!
//! - [`service::Sequencer`] is a synchronous state machine: one event in, a
//!   list of [`domain::Command`]s out. All I/O lives outside it.
//! - [`service::SequencerRuntime`] wraps a sequencer in a tokio task: a
//!   bounded inbound queue (the serialization point) and a bounded outbound
//!   pool whose completions re-enter as events.
//! - Collaborators (base-ledger submitter, key manager, domain state store,
//!   block indexer) sit behind the traits in [`ports`].

pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use config::SequencerConfig;
pub use domain::command::Command;
pub use domain::errors::SequencerError;
pub use domain::events::SequencerEvent;
pub use service::runtime::{SequencerHandle, SequencerRuntime};
pub use service::sequencer::Sequencer;
