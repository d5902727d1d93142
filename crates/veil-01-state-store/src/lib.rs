//! # State Reference Store
//!
//! Single source of truth, per node, for the `(state, claim/spend/confirm)`
//! relation. All sequencer instances in a process share one store.
//!
//! ## Discipline
//!
//! - Every write is serialized per `StateId` via stripe locks; readers never
//!   observe torn records.
//! - Every successful mutation is journaled append-only; on restart the
//!   store is rebuilt by replaying the journal (the base ledger's
//!   confirmation stream tops it up afterwards).
//! - All operations are idempotent: repeating a write that already took
//!   effect succeeds without a second journal entry.

pub mod config;
pub mod domain;
pub mod journal;
pub mod store;

pub use config::StateStoreConfig;
pub use domain::entities::{StateLock, StateRecord};
pub use domain::errors::StateStoreError;
pub use domain::tables::DerivedTables;
pub use journal::JournalEntry;
pub use store::StateRefStore;
