//! # Shared Types Crate
//!
//! Domain types shared by every coordinator crate: identifiers, the
//! private-transaction entity with its lifecycle phase, endorsement and
//! delegation records, and the transport envelope.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: cross-crate types are defined here, once.
//! - **Opaque identifiers**: states are 32-byte content hashes, transactions
//!   are UUIDs; neither carries structure the coordinator may depend on.
//! - **Envelope routing**: all node-to-node traffic is wrapped in
//!   [`TransportEnvelope`]; the envelope's `sender_node` is authoritative for
//!   origin, and payloads do not duplicate it.

pub mod envelope;
pub mod ids;
pub mod transaction;

pub use envelope::TransportEnvelope;
pub use ids::{NodeName, Nullifier, PartyName, StateId, TransactionId};
pub use transaction::{
    DelegationRecord, EndorsementRecord, PhaseError, PrivateTransaction, TransactionPhase,
};
