//! Derived table snapshots.
//!
//! The journal is the source of truth; these tables are what a relational
//! mirror of it would contain. Snapshots use ordered maps so that two stores
//! rebuilt from the same journal compare (and serialize) identically.

use crate::domain::entities::StateLock;
use serde::{Deserialize, Serialize};
use shared_types::{Nullifier, StateId, TransactionId};
use std::collections::BTreeMap;

/// Point-in-time snapshot of the derived tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedTables {
    /// `state_confirms`: state -> base-ledger block of confirmation.
    pub state_confirms: BTreeMap<StateId, u64>,
    /// `state_spends`: state -> spending transaction.
    pub state_spends: BTreeMap<StateId, TransactionId>,
    /// `state_locks`: state -> current lock holder and mode.
    pub state_locks: BTreeMap<StateId, StateLock>,
    /// `state_nullifiers`: nullifier -> state, unique in both directions.
    pub state_nullifiers: BTreeMap<Nullifier, StateId>,
}
