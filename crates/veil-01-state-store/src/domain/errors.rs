//! Error types for the state reference store.

use shared_types::{Nullifier, StateId, TransactionId};
use thiserror::Error;

/// Errors surfaced by store operations.
///
/// Conflicts carry the current holder so the caller can decide whether to
/// contend, wait, or revert; they are never retried blindly.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// No record for the requested state.
    #[error("state not found: {state}")]
    NotFound { state: StateId },

    /// A different transaction already holds the claim.
    #[error("state {state} already claimed by {holder}")]
    ClaimConflict {
        state: StateId,
        holder: TransactionId,
    },

    /// A different transaction already spent the state.
    #[error("state {state} already spent by {holder}")]
    SpendConflict {
        state: StateId,
        holder: TransactionId,
    },

    /// The state was already confirmed at a different block.
    #[error("state {state} already confirmed at block {existing_block}")]
    ConfirmConflict { state: StateId, existing_block: u64 },

    /// The nullifier or the state is already bound to another pairing.
    #[error("nullifier {nullifier} conflicts with an existing binding")]
    NullifierConflict { nullifier: Nullifier },

    /// Journal I/O failure.
    #[error("journal error: {0}")]
    Journal(#[from] std::io::Error),

    /// The journal failed integrity checks on replay. Fatal for this store.
    #[error("corrupt journal: {reason}")]
    CorruptJournal { reason: String },
}
