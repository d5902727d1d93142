//! # `StateRefStore`
//!
//! Stripe-locked, journaled store of state references. Shared across all
//! sequencer instances in a process behind an `Arc`.
//!
//! Lock ordering: stripe lock first, then the journal mutex. Neither is ever
//! held across an `.await`; all operations here are synchronous.

use crate::config::StateStoreConfig;
use crate::domain::entities::{StateLock, StateRecord};
use crate::domain::errors::StateStoreError;
use crate::domain::tables::DerivedTables;
use crate::journal::{self, JournalEntry, JournalWriter};
use parking_lot::Mutex;
use shared_types::{Nullifier, StateId, TransactionId};
use std::collections::HashMap;
use tracing::debug;

/// Outcome of applying an entry to in-memory state: whether anything
/// actually changed (and therefore needs journaling).
enum Applied {
    Changed,
    NoOp,
}

struct Shard {
    records: HashMap<StateId, StateRecord>,
}

/// The shared state reference store.
pub struct StateRefStore {
    shards: Vec<Mutex<Shard>>,
    /// Nullifier bindings, unique in both directions. Separate keyspace from
    /// the record shards, so a separate lock.
    nullifiers: Mutex<NullifierTable>,
    journal: Mutex<JournalWriter>,
}

#[derive(Default)]
struct NullifierTable {
    by_nullifier: HashMap<Nullifier, StateId>,
    by_state: HashMap<StateId, Nullifier>,
}

impl StateRefStore {
    /// Open the store, replaying any existing journal.
    pub fn open(config: &StateStoreConfig) -> Result<Self, StateStoreError> {
        let entries = journal::replay(&config.journal_path)?;
        let writer = JournalWriter::open(&config.journal_path, config.fsync_on_append)?;

        let stripe_count = config.stripe_count.max(1);
        let store = Self {
            shards: (0..stripe_count)
                .map(|_| {
                    Mutex::new(Shard {
                        records: HashMap::new(),
                    })
                })
                .collect(),
            nullifiers: Mutex::new(NullifierTable::default()),
            journal: Mutex::new(writer),
        };

        for entry in &entries {
            // Replay cannot conflict with itself: the journal only ever
            // records writes that were accepted.
            store.apply_unjournaled(entry)?;
        }
        Ok(store)
    }

    fn shard_for(&self, state: &StateId) -> &Mutex<Shard> {
        // First eight bytes of a content hash are as uniform as any.
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&state.as_bytes()[..8]);
        let index = (u64::from_le_bytes(prefix) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Set `claimed_by := tx` iff currently unset or already `tx`.
    pub fn record_claim(
        &self,
        state: StateId,
        tx: TransactionId,
    ) -> Result<(), StateStoreError> {
        self.mutate(JournalEntry::Claim {
            state,
            transaction: tx,
        })
    }

    /// Clear `claimed_by` iff it currently equals `tx`. Clearing an unclaimed
    /// state is a no-op; clearing someone else's claim is a conflict.
    pub fn release_claim(
        &self,
        state: StateId,
        tx: TransactionId,
    ) -> Result<(), StateStoreError> {
        self.mutate(JournalEntry::ReleaseClaim {
            state,
            transaction: tx,
        })
    }

    /// Register `state` as an output produced by `tx`.
    pub fn record_output(
        &self,
        state: StateId,
        tx: TransactionId,
    ) -> Result<(), StateStoreError> {
        self.mutate(JournalEntry::Output {
            state,
            transaction: tx,
        })
    }

    /// Mark `state` spent by `tx`. Guarded: conflicts if another transaction
    /// already spent it; idempotent for the same spender.
    pub fn record_spend(
        &self,
        state: StateId,
        tx: TransactionId,
    ) -> Result<(), StateStoreError> {
        self.mutate(JournalEntry::Spend {
            state,
            transaction: tx,
        })
    }

    /// Record base-ledger confirmation. Immutable once set: a differing
    /// block is a conflict, the same block is a no-op.
    pub fn record_confirm(&self, state: StateId, block: u64) -> Result<(), StateStoreError> {
        self.mutate(JournalEntry::Confirm { state, block })
    }

    /// Bind a nullifier to a state, unique in both directions.
    pub fn record_nullifier(
        &self,
        nullifier: Nullifier,
        state: StateId,
    ) -> Result<(), StateStoreError> {
        self.mutate(JournalEntry::BindNullifier { nullifier, state })
    }

    /// Fetch the record for `state`.
    pub fn lookup(&self, state: &StateId) -> Result<StateRecord, StateStoreError> {
        let shard = self.shard_for(state).lock();
        shard
            .records
            .get(state)
            .cloned()
            .ok_or(StateStoreError::NotFound { state: *state })
    }

    /// Snapshot the derived tables. Two stores rebuilt from the same journal
    /// produce identical snapshots.
    pub fn tables(&self) -> DerivedTables {
        let mut tables = DerivedTables::default();
        for shard in &self.shards {
            let shard = shard.lock();
            for record in shard.records.values() {
                if let Some(block) = record.confirmed_at {
                    tables.state_confirms.insert(record.id, block);
                }
                if let Some(spender) = record.spent_by {
                    tables.state_spends.insert(record.id, spender);
                }
                let claimant = record.claimed_by;
                let creator = record.created_by;
                if claimant.is_some() || creator.is_some() {
                    // A lock row reflects the transaction holding the state:
                    // the claimant when one exists, else the producer.
                    let holder = claimant.or(creator);
                    if let Some(transaction) = holder {
                        tables.state_locks.insert(
                            record.id,
                            StateLock {
                                transaction,
                                creating: creator == Some(transaction),
                                spending: claimant == Some(transaction),
                            },
                        );
                    }
                }
            }
        }
        let nullifiers = self.nullifiers.lock();
        for (nullifier, state) in &nullifiers.by_nullifier {
            tables.state_nullifiers.insert(*nullifier, *state);
        }
        tables
    }

    /// Validate and apply an entry; journal it only if it changed anything.
    fn mutate(&self, entry: JournalEntry) -> Result<(), StateStoreError> {
        match self.apply_unjournaled(&entry)? {
            Applied::Changed => {
                let mut journal = self.journal.lock();
                journal.append(&entry)?;
                Ok(())
            }
            Applied::NoOp => Ok(()),
        }
    }

    fn apply_unjournaled(&self, entry: &JournalEntry) -> Result<Applied, StateStoreError> {
        match entry {
            JournalEntry::Claim { state, transaction } => {
                let mut shard = self.shard_for(state).lock();
                let record = shard
                    .records
                    .entry(*state)
                    .or_insert_with(|| StateRecord::new(*state));
                match record.claimed_by {
                    None => {
                        record.claimed_by = Some(*transaction);
                        debug!(state = %state, tx = %transaction, "[veil-01] claim recorded");
                        Ok(Applied::Changed)
                    }
                    Some(holder) if holder == *transaction => Ok(Applied::NoOp),
                    Some(holder) => Err(StateStoreError::ClaimConflict {
                        state: *state,
                        holder,
                    }),
                }
            }
            JournalEntry::ReleaseClaim { state, transaction } => {
                let mut shard = self.shard_for(state).lock();
                let Some(record) = shard.records.get_mut(state) else {
                    return Ok(Applied::NoOp);
                };
                match record.claimed_by {
                    Some(holder) if holder == *transaction => {
                        record.claimed_by = None;
                        debug!(state = %state, tx = %transaction, "[veil-01] claim released");
                        Ok(Applied::Changed)
                    }
                    Some(holder) => Err(StateStoreError::ClaimConflict {
                        state: *state,
                        holder,
                    }),
                    None => Ok(Applied::NoOp),
                }
            }
            JournalEntry::Output { state, transaction } => {
                let mut shard = self.shard_for(state).lock();
                let record = shard
                    .records
                    .entry(*state)
                    .or_insert_with(|| StateRecord::new(*state));
                match record.created_by {
                    None => {
                        record.created_by = Some(*transaction);
                        Ok(Applied::Changed)
                    }
                    Some(creator) if creator == *transaction => Ok(Applied::NoOp),
                    Some(creator) => Err(StateStoreError::ClaimConflict {
                        state: *state,
                        holder: creator,
                    }),
                }
            }
            JournalEntry::Spend { state, transaction } => {
                let mut shard = self.shard_for(state).lock();
                let record = shard
                    .records
                    .entry(*state)
                    .or_insert_with(|| StateRecord::new(*state));
                match record.spent_by {
                    None => {
                        record.spent_by = Some(*transaction);
                        debug!(state = %state, tx = %transaction, "[veil-01] spend recorded");
                        Ok(Applied::Changed)
                    }
                    Some(holder) if holder == *transaction => Ok(Applied::NoOp),
                    Some(holder) => Err(StateStoreError::SpendConflict {
                        state: *state,
                        holder,
                    }),
                }
            }
            JournalEntry::Confirm { state, block } => {
                let mut shard = self.shard_for(state).lock();
                let record = shard
                    .records
                    .entry(*state)
                    .or_insert_with(|| StateRecord::new(*state));
                match record.confirmed_at {
                    None => {
                        record.confirmed_at = Some(*block);
                        Ok(Applied::Changed)
                    }
                    Some(existing) if existing == *block => Ok(Applied::NoOp),
                    Some(existing_block) => Err(StateStoreError::ConfirmConflict {
                        state: *state,
                        existing_block,
                    }),
                }
            }
            JournalEntry::BindNullifier { nullifier, state } => {
                let mut table = self.nullifiers.lock();
                match (
                    table.by_nullifier.get(nullifier),
                    table.by_state.get(state),
                ) {
                    (None, None) => {
                        table.by_nullifier.insert(*nullifier, *state);
                        table.by_state.insert(*state, *nullifier);
                        // The record mirrors the binding for lookups.
                        let mut shard = self.shard_for(state).lock();
                        let record = shard
                            .records
                            .entry(*state)
                            .or_insert_with(|| StateRecord::new(*state));
                        record.nullifier = Some(*nullifier);
                        Ok(Applied::Changed)
                    }
                    (Some(bound_state), Some(bound_nullifier))
                        if bound_state == state && bound_nullifier == nullifier =>
                    {
                        Ok(Applied::NoOp)
                    }
                    _ => Err(StateStoreError::NullifierConflict {
                        nullifier: *nullifier,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn state(n: u8) -> StateId {
        StateId::new([n; 32])
    }

    fn txid(n: u8) -> TransactionId {
        TransactionId(Uuid::from_bytes([n; 16]))
    }

    fn open_store(dir: &tempfile::TempDir) -> StateRefStore {
        let config = StateStoreConfig {
            journal_path: dir.path().join("journal.bin"),
            ..Default::default()
        };
        StateRefStore::open(&config).unwrap()
    }

    #[test]
    fn test_claim_then_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.record_claim(state(1), txid(1)).unwrap();
        // Same claimant again: idempotent.
        store.record_claim(state(1), txid(1)).unwrap();

        let err = store.record_claim(state(1), txid(2)).unwrap_err();
        match err {
            StateStoreError::ClaimConflict { holder, .. } => assert_eq!(holder, txid(1)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_release_only_by_holder() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.record_claim(state(1), txid(1)).unwrap();
        assert!(store.release_claim(state(1), txid(2)).is_err());

        store.release_claim(state(1), txid(1)).unwrap();
        assert_eq!(store.lookup(&state(1)).unwrap().claimed_by, None);

        // Releasing an unclaimed state is harmless.
        store.release_claim(state(1), txid(1)).unwrap();
    }

    #[test]
    fn test_confirm_is_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.record_confirm(state(1), 42).unwrap();
        store.record_confirm(state(1), 42).unwrap();
        assert!(matches!(
            store.record_confirm(state(1), 43),
            Err(StateStoreError::ConfirmConflict {
                existing_block: 42,
                ..
            })
        ));
    }

    #[test]
    fn test_nullifier_unique_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let null_a = Nullifier::new([0xA0; 32]);
        let null_b = Nullifier::new([0xB0; 32]);

        store.record_nullifier(null_a, state(1)).unwrap();
        store.record_nullifier(null_a, state(1)).unwrap();

        // Same nullifier, different state.
        assert!(store.record_nullifier(null_a, state(2)).is_err());
        // Different nullifier, same state.
        assert!(store.record_nullifier(null_b, state(1)).is_err());
    }

    #[test]
    fn test_lookup_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(matches!(
            store.lookup(&state(9)),
            Err(StateStoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_rebuild_from_journal_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let config = StateStoreConfig {
            journal_path: dir.path().join("journal.bin"),
            ..Default::default()
        };

        let tables_before = {
            let store = StateRefStore::open(&config).unwrap();
            store.record_output(state(1), txid(1)).unwrap();
            store.record_claim(state(1), txid(2)).unwrap();
            store.record_spend(state(1), txid(2)).unwrap();
            store.record_confirm(state(1), 7).unwrap();
            store.record_confirm(state(2), 9).unwrap();
            store
                .record_nullifier(Nullifier::new([0xEE; 32]), state(1))
                .unwrap();
            store.tables()
        };

        let reopened = StateRefStore::open(&config).unwrap();
        assert_eq!(reopened.tables(), tables_before);
        assert_eq!(
            bincode::serialize(&reopened.tables()).unwrap(),
            bincode::serialize(&tables_before).unwrap()
        );
    }

    #[test]
    fn test_idempotent_writes_do_not_grow_journal() {
        let dir = tempfile::tempdir().unwrap();
        let config = StateStoreConfig {
            journal_path: dir.path().join("journal.bin"),
            ..Default::default()
        };
        let store = StateRefStore::open(&config).unwrap();

        store.record_claim(state(1), txid(1)).unwrap();
        let len_once = std::fs::metadata(&config.journal_path).unwrap().len();
        store.record_claim(state(1), txid(1)).unwrap();
        let len_twice = std::fs::metadata(&config.journal_path).unwrap().len();
        assert_eq!(len_once, len_twice);
    }

    #[test]
    fn test_single_claimant_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(&dir));
        let contended = state(5);

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.record_claim(contended, txid(n)).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
        assert!(store.lookup(&contended).unwrap().claimed_by.is_some());
    }
}
