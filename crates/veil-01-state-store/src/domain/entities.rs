//! Core entities of the state reference store.

use serde::{Deserialize, Serialize};
use shared_types::{Nullifier, StateId, TransactionId};

/// Everything this node knows about one private state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: StateId,
    /// Alternative consumption identifier, if the domain registered one.
    pub nullifier: Option<Nullifier>,
    /// Transaction currently holding the claim on this state, if any.
    /// At most one claimant at a time.
    pub claimed_by: Option<TransactionId>,
    /// Transaction that spent this state. Set when the spender dispatches.
    pub spent_by: Option<TransactionId>,
    /// Base-ledger block at which the state was confirmed. Immutable once
    /// set.
    pub confirmed_at: Option<u64>,
    /// Transaction that produced this state as an output, if assembled
    /// through this node.
    pub created_by: Option<TransactionId>,
}

impl StateRecord {
    #[must_use]
    pub fn new(id: StateId) -> Self {
        Self {
            id,
            nullifier: None,
            claimed_by: None,
            spent_by: None,
            confirmed_at: None,
            created_by: None,
        }
    }
}

/// One row of the `state_locks` table: a transaction's hold on a state,
/// either as its producer, its consumer, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLock {
    pub transaction: TransactionId,
    pub creating: bool,
    pub spending: bool,
}
