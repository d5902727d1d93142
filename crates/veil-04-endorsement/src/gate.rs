//! The gate itself.

use serde::{Deserialize, Serialize};
use shared_types::{StateId, TransactionId};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// A request to endorse `transaction_id` consuming `input_states`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsementRequest {
    pub transaction_id: TransactionId,
    pub input_states: BTreeSet<StateId>,
}

/// Outcome of an endorsement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndorsementVerdict {
    /// The request may be signed; its inputs are now held.
    Approved,
    /// Some input is already held by a live, previously approved
    /// transaction.
    Rejected {
        /// The first contested input found.
        contested_state: StateId,
        /// The transaction currently holding it.
        current_holder: TransactionId,
    },
}

impl EndorsementVerdict {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Tracks which inputs this node has signed for, by state and by
/// transaction. The two maps are kept mutually consistent.
#[derive(Debug, Default)]
pub struct EndorsementGate {
    signed_inputs: HashMap<StateId, TransactionId>,
    signed_by_tx: HashMap<TransactionId, HashSet<StateId>>,
}

impl EndorsementGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve iff every requested input is unheld or already held by the
    /// requesting transaction. On approval, atomically hold every input.
    pub fn approve_endorsement(&mut self, request: &EndorsementRequest) -> EndorsementVerdict {
        for state in &request.input_states {
            if let Some(&holder) = self.signed_inputs.get(state) {
                if holder != request.transaction_id {
                    debug!(
                        tx = %request.transaction_id,
                        state = %state,
                        holder = %holder,
                        "[veil-04] endorsement rejected, input already signed away"
                    );
                    return EndorsementVerdict::Rejected {
                        contested_state: *state,
                        current_holder: holder,
                    };
                }
            }
        }

        let held = self
            .signed_by_tx
            .entry(request.transaction_id)
            .or_default();
        for state in &request.input_states {
            self.signed_inputs.insert(*state, request.transaction_id);
            held.insert(*state);
        }
        debug!(
            tx = %request.transaction_id,
            inputs = request.input_states.len(),
            "[veil-04] endorsement approved"
        );
        EndorsementVerdict::Approved
    }

    /// Release every input held by `transaction`; later requests for those
    /// states may then be approved.
    pub fn on_transaction_reverted(&mut self, transaction: &TransactionId) {
        if let Some(states) = self.signed_by_tx.remove(transaction) {
            for state in &states {
                if self.signed_inputs.get(state) == Some(transaction) {
                    self.signed_inputs.remove(state);
                }
            }
            debug!(tx = %transaction, released = states.len(), "[veil-04] endorsement inputs released");
        }
    }

    /// The transaction currently holding `state`, if any.
    #[must_use]
    pub fn holder_of(&self, state: &StateId) -> Option<TransactionId> {
        self.signed_inputs.get(state).copied()
    }

    /// Number of transactions currently holding at least one input.
    #[must_use]
    pub fn live_transactions(&self) -> usize {
        self.signed_by_tx.len()
    }
}
