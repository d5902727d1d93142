//! In-memory base ledger for tests and single-process deployments.
//!
//! Implements both collaborator ports: the submitter (with idempotent
//! batch deduplication) and the block indexer (with explicit mining and
//! re-org retraction, driven by tests or an operator loop).

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use shared_types::TransactionId;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};
use veil_06_sequencer::domain::events::{IndexedBlockEvent, LedgerReceipt};
use veil_06_sequencer::ports::{
    BaseLedgerSubmitter, BlockIndexer, SubmissionStatus, SubmitterError,
};

#[derive(Clone)]
struct Submission {
    hash: [u8; 32],
    signer: String,
    transactions: Vec<TransactionId>,
}

struct LedgerInner {
    next_block: u64,
    /// Batches submitted but not yet mined.
    pending: Vec<Submission>,
    /// Status by base-ledger tx hash.
    statuses: HashMap<[u8; 32], SubmissionStatus>,
    /// Blocks that have been mined, for retraction.
    mined: HashMap<u64, Vec<Submission>>,
    /// Mining order, for assertions about cross-node dispatch.
    history: Vec<(u64, String, Vec<TransactionId>)>,
}

/// A base ledger that mines on demand.
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
    blocks: broadcast::Sender<IndexedBlockEvent>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        let (blocks, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(LedgerInner {
                next_block: 1,
                pending: Vec::new(),
                statuses: HashMap::new(),
                mined: HashMap::new(),
                history: Vec::new(),
            }),
            blocks,
        }
    }

    /// Mine every pending batch into one block and notify subscribers.
    /// Returns the block number, or `None` when nothing was pending.
    pub fn mine_block(&self) -> Option<u64> {
        let (block_number, receipts) = {
            let mut inner = self.inner.lock();
            if inner.pending.is_empty() {
                return None;
            }
            let block_number = inner.next_block;
            inner.next_block += 1;
            let batches = std::mem::take(&mut inner.pending);

            let mut receipts = Vec::new();
            for submission in &batches {
                inner
                    .statuses
                    .insert(submission.hash, SubmissionStatus::Confirmed { block_number });
                inner.history.push((
                    block_number,
                    submission.signer.clone(),
                    submission.transactions.clone(),
                ));
                for id in &submission.transactions {
                    receipts.push(LedgerReceipt {
                        transaction_id: *id,
                        success: true,
                    });
                }
            }
            inner.mined.insert(block_number, batches);
            (block_number, receipts)
        };

        info!(block = block_number, receipts = receipts.len(), "[veil-node] block mined");
        let _ = self.blocks.send(IndexedBlockEvent::Block {
            block_number,
            block_hash: block_hash_for(block_number),
            parent_hash: block_hash_for(block_number.saturating_sub(1)),
            receipts,
        });
        Some(block_number)
    }

    /// Retract a mined block, as a re-org would; its batches return to
    /// pending and subscribers see the retraction.
    pub fn retract_block(&self, block_number: u64) {
        let retracted = {
            let mut inner = self.inner.lock();
            let Some(batches) = inner.mined.remove(&block_number) else {
                return;
            };
            for submission in &batches {
                inner
                    .statuses
                    .insert(submission.hash, SubmissionStatus::Pending);
            }
            inner.pending.extend(batches);
            true
        };
        if retracted {
            info!(block = block_number, "[veil-node] block retracted");
            let _ = self.blocks.send(IndexedBlockEvent::Retracted {
                block_number,
                block_hash: block_hash_for(block_number),
            });
        }
    }

    /// Mined batches in mining order: `(block, signer, transactions)`.
    #[must_use]
    pub fn mined_history(&self) -> Vec<(u64, String, Vec<TransactionId>)> {
        self.inner.lock().history.clone()
    }

    /// Every mined transaction id, in mining order.
    #[must_use]
    pub fn mined_transactions(&self) -> Vec<TransactionId> {
        self.inner
            .lock()
            .history
            .iter()
            .flat_map(|(_, _, txs)| txs.iter().copied())
            .collect()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn block_hash_for(block_number: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"veil-inmemory-block");
    hasher.update(block_number.to_le_bytes());
    hasher.finalize().into()
}

fn batch_hash(batch: &[TransactionId], signer: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(signer.as_bytes());
    for id in batch {
        hasher.update(id.as_bytes());
    }
    hasher.finalize().into()
}

#[async_trait]
impl BaseLedgerSubmitter for InMemoryLedger {
    async fn submit(
        &self,
        batch: &[TransactionId],
        signer: &str,
    ) -> Result<[u8; 32], SubmitterError> {
        let hash = batch_hash(batch, signer);
        let mut inner = self.inner.lock();
        if inner.statuses.contains_key(&hash) {
            // At-least-once dispatch: the duplicate is rejected here so the
            // batch lands exactly once on the ledger.
            return Err(SubmitterError::Duplicate {
                batch_id: hex::encode(hash),
            });
        }
        inner.statuses.insert(hash, SubmissionStatus::Pending);
        inner.pending.push(Submission {
            hash,
            signer: signer.to_owned(),
            transactions: batch.to_vec(),
        });
        debug!(batch_len = batch.len(), "[veil-node] batch accepted for mining");
        Ok(hash)
    }

    async fn observe(&self, tx_hash: &[u8; 32]) -> Result<SubmissionStatus, SubmitterError> {
        let inner = self.inner.lock();
        inner
            .statuses
            .get(tx_hash)
            .cloned()
            .ok_or(SubmitterError::Unavailable {
                reason: "unknown submission".into(),
            })
    }
}

impl BlockIndexer for InMemoryLedger {
    fn subscribe(&self) -> broadcast::Receiver<IndexedBlockEvent> {
        self.blocks.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn txid(n: u8) -> TransactionId {
        TransactionId(Uuid::from_bytes([n; 16]))
    }

    #[tokio::test]
    async fn test_submit_mine_observe() {
        let ledger = InMemoryLedger::new();
        let hash = ledger.submit(&[txid(1), txid(2)], "signer").await.unwrap();
        assert_eq!(
            ledger.observe(&hash).await.unwrap(),
            SubmissionStatus::Pending
        );

        let block = ledger.mine_block().unwrap();
        assert_eq!(
            ledger.observe(&hash).await.unwrap(),
            SubmissionStatus::Confirmed {
                block_number: block
            }
        );
        assert_eq!(ledger.mined_transactions(), vec![txid(1), txid(2)]);
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.submit(&[txid(1)], "signer").await.unwrap();
        let err = ledger.submit(&[txid(1)], "signer").await.unwrap_err();
        assert!(matches!(err, SubmitterError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_mined_block_notifies_subscribers() {
        let ledger = InMemoryLedger::new();
        let mut blocks = ledger.subscribe();
        ledger.submit(&[txid(1)], "signer").await.unwrap();
        let block = ledger.mine_block().unwrap();

        match blocks.recv().await.unwrap() {
            IndexedBlockEvent::Block {
                block_number,
                receipts,
                ..
            } => {
                assert_eq!(block_number, block);
                assert_eq!(receipts.len(), 1);
                assert!(receipts[0].success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retraction_returns_batch_to_pending() {
        let ledger = InMemoryLedger::new();
        let mut blocks = ledger.subscribe();
        let hash = ledger.submit(&[txid(1)], "signer").await.unwrap();
        let block = ledger.mine_block().unwrap();
        let _ = blocks.recv().await.unwrap();

        ledger.retract_block(block);
        assert_eq!(
            ledger.observe(&hash).await.unwrap(),
            SubmissionStatus::Pending
        );
        assert!(matches!(
            blocks.recv().await.unwrap(),
            IndexedBlockEvent::Retracted { .. }
        ));

        // Re-mining confirms it in a later block.
        let re_mined = ledger.mine_block().unwrap();
        assert!(re_mined > block);
    }

    #[tokio::test]
    async fn test_mine_with_nothing_pending() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.mine_block(), None);
    }

    #[tokio::test]
    async fn test_history_records_signers() {
        let ledger = InMemoryLedger::new();
        ledger.submit(&[txid(1)], "signer-a").await.unwrap();
        ledger.mine_block().unwrap();
        ledger.submit(&[txid(2)], "signer-b").await.unwrap();
        ledger.mine_block().unwrap();

        let history = ledger.mined_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].1, "signer-a");
        assert_eq!(history[1].1, "signer-b");
    }
}
