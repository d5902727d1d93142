//! Error types for the dependency graph.

use shared_types::TransactionId;
use thiserror::Error;

/// All errors the graph can produce.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Inserting this transaction would create a dependency cycle.
    #[error("transaction {transaction} would create a dependency cycle")]
    DependencyCycle { transaction: TransactionId },

    /// The transaction is already present.
    #[error("transaction {transaction} already in graph")]
    DuplicateTransaction { transaction: TransactionId },

    /// No such transaction in the graph.
    #[error("transaction {transaction} not in graph")]
    UnknownTransaction { transaction: TransactionId },
}
