//! Sequencer error types.

use shared_types::{PhaseError, TransactionId};
use thiserror::Error;
use veil_01_state_store::StateStoreError;
use veil_02_dep_graph::GraphError;

/// Errors from sequencer event handling.
///
/// The event loop recovers from everything except `Fatal`, which stops the
/// instance and surfaces to operators.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// Event referenced a transaction this instance has never seen.
    #[error("unknown transaction {transaction}")]
    UnknownTransaction { transaction: TransactionId },

    /// An operation that requires ownership was attempted on a transaction
    /// sequenced elsewhere.
    #[error("transaction {transaction} is owned by {owner}")]
    NotOwned {
        transaction: TransactionId,
        owner: String,
    },

    /// The transaction declares overlapping inputs and outputs; reported
    /// to the submitting client.
    #[error("transaction {transaction} declares overlapping inputs and outputs")]
    IllFormed { transaction: TransactionId },

    /// Inserting the transaction would create a dependency cycle; reported
    /// to the submitting client.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Illegal lifecycle transition.
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// State reference store rejected a write.
    #[error(transparent)]
    Store(#[from] StateStoreError),

    /// Invariant violated mid-operation; the instance must stop.
    #[error("fatal: {reason}")]
    Fatal { reason: String },
}

impl SequencerError {
    /// Whether the instance must stop processing.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Fatal { .. } | Self::Store(StateStoreError::CorruptJournal { .. })
        )
    }
}
