//! Outbound (driven) ports of the sequencer.
//!
//! Each collaborator gets a small capability trait; concrete adapters live
//! in the node runtime. Variants of a collaborator (static vs filesystem
//! key stores, in-memory vs real ledger) are tagged configurations there,
//! not trait hierarchies here.

use crate::domain::events::IndexedBlockEvent;
use async_trait::async_trait;
use shared_types::{NodeName, StateId, TransactionId};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from the base-ledger submitter.
#[derive(Debug, Error)]
pub enum SubmitterError {
    /// The ledger endpoint rejected or dropped the submission; retryable.
    #[error("submission failed: {reason}")]
    Unavailable { reason: String },
    /// The batch was rejected as a duplicate; the earlier submission
    /// stands. Callers treat this as success.
    #[error("duplicate submission of batch {batch_id}")]
    Duplicate { batch_id: String },
}

/// Outcome of observing a base-ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Confirmed { block_number: u64 },
    Reverted { reason: String },
}

/// Submits dispatch batches to the base ledger and answers outcome queries.
///
/// Submission is at-least-once; implementations deduplicate on the batch
/// payload so a re-submitted batch lands exactly once on the ledger.
#[async_trait]
pub trait BaseLedgerSubmitter: Send + Sync {
    /// Submit a dependency-ordered batch; returns the base-ledger tx hash.
    async fn submit(
        &self,
        batch: &[TransactionId],
        signer: &str,
    ) -> Result<[u8; 32], SubmitterError>;

    /// Query the outcome of an earlier submission.
    async fn observe(&self, tx_hash: &[u8; 32]) -> Result<SubmissionStatus, SubmitterError>;
}

/// Errors from the key manager.
#[derive(Debug, Error)]
pub enum KeyManagerError {
    #[error("no key for identifier {identifier}")]
    UnknownIdentifier { identifier: String },
    #[error("signing failed: {reason}")]
    SigningFailed { reason: String },
}

/// Opaque handle to a resolved key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle(pub String);

/// Resolves identifiers to keys and signs payloads.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Resolve an identifier to a key handle and its public verifier.
    async fn resolve_key(
        &self,
        identifier: &str,
        algorithm: &str,
        verifier_type: &str,
    ) -> Result<(KeyHandle, String), KeyManagerError>;

    /// Sign a payload with a previously resolved key.
    async fn sign(&self, key: &KeyHandle, payload: &[u8]) -> Result<Vec<u8>, KeyManagerError>;
}

/// Errors from the domain state store.
#[derive(Debug, Error)]
pub enum DomainStateError {
    #[error("unknown schema {schema_id}")]
    UnknownSchema { schema_id: String },
    #[error("state query failed: {reason}")]
    QueryFailed { reason: String },
    #[error("state data does not hash to its declared id")]
    HashMismatch,
}

/// Query over available states, interpreted by the domain plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateQuery {
    /// Opaque domain query document (JSON).
    pub query_json: String,
    /// Cap on returned states.
    pub limit: Option<usize>,
}

/// A state as the domain plugin sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainState {
    pub id: StateId,
    pub schema_id: String,
    pub data: Vec<u8>,
    pub created_by: Option<TransactionId>,
}

/// Domain-plugin-facing state access.
#[async_trait]
pub trait DomainStateStore: Send + Sync {
    /// Find states available for spending under a schema.
    async fn find_available_states(
        &self,
        schema_id: &str,
        query: &StateQuery,
        use_nullifiers: bool,
    ) -> Result<Vec<DomainState>, DomainStateError>;

    /// Insert or update states produced by assembly.
    async fn upsert_states(&self, states: Vec<DomainState>) -> Result<(), DomainStateError>;

    /// Check content hashes and return the canonical ids.
    async fn validate_state_hashes(
        &self,
        states: &[DomainState],
    ) -> Result<Vec<StateId>, DomainStateError>;
}

/// Source of base-ledger block notifications.
///
/// The sequencer trusts the indexer to retract previously emitted blocks on
/// re-org.
pub trait BlockIndexer: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<IndexedBlockEvent>;
}

/// Names the peer nodes that should receive event broadcasts for a
/// contract.
pub trait PeerDirectory: Send + Sync {
    fn peers(&self) -> Vec<NodeName>;
}

/// Time source, abstracted for deterministic tests.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Mock time source for tests.
#[cfg(test)]
pub struct MockTimeSource {
    millis: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl MockTimeSource {
    pub fn new(initial: u64) -> Self {
        Self {
            millis: std::sync::atomic::AtomicU64::new(initial),
        }
    }

    pub fn advance(&self, delta: u64) {
        self.millis
            .fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl TimeSource for MockTimeSource {
    fn now_millis(&self) -> u64 {
        self.millis.load(std::sync::atomic::Ordering::SeqCst)
    }
}
