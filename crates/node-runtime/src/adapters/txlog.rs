//! Transaction body log.
//!
//! Append-only record of in-flight transaction bodies so the sequencer can
//! rebuild its graph after a restart. Later appends for the same id
//! supersede earlier ones on load; terminal phases drop the entry.

use shared_types::{PrivateTransaction, TransactionId};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Magic + format version prefix of every log file.
const TXLOG_MAGIC: &[u8; 8] = b"VEILTXL\x01";

/// Append-only log of transaction snapshots.
pub struct TransactionLog {
    path: PathBuf,
}

impl TransactionLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append the current snapshot of a transaction.
    pub fn append(&self, transaction: &PrivateTransaction) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = bincode::serialize(transaction)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let fresh = !self.path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if fresh {
            file.write_all(TXLOG_MAGIC)?;
        }
        file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.sync_data()?;
        Ok(())
    }

    /// Load surviving snapshots: last write wins per id, terminal phases
    /// drop out. A torn tail record is skipped with a warning.
    pub fn load(&self) -> std::io::Result<Vec<PrivateTransaction>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if bytes.len() < TXLOG_MAGIC.len() || &bytes[..TXLOG_MAGIC.len()] != TXLOG_MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "bad transaction log magic",
            ));
        }

        let mut survivors: BTreeMap<TransactionId, PrivateTransaction> = BTreeMap::new();
        let mut cursor = TXLOG_MAGIC.len();
        while cursor + 4 <= bytes.len() {
            let len = u32::from_le_bytes([
                bytes[cursor],
                bytes[cursor + 1],
                bytes[cursor + 2],
                bytes[cursor + 3],
            ]) as usize;
            if cursor + 4 + len > bytes.len() {
                warn!("[veil-node] transaction log has a torn tail record, stopping load early");
                break;
            }
            match bincode::deserialize::<PrivateTransaction>(&bytes[cursor + 4..cursor + 4 + len])
            {
                Ok(transaction) => {
                    if transaction.phase.is_terminal() {
                        survivors.remove(&transaction.id);
                    } else {
                        survivors.insert(transaction.id, transaction);
                    }
                }
                Err(e) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                }
            }
            cursor += 4 + len;
        }

        info!(transactions = survivors.len(), "[veil-node] transaction log loaded");
        Ok(survivors.into_values().collect())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
