//! Configuration for the state reference store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateStoreConfig {
    /// Path of the append-only journal file.
    pub journal_path: PathBuf,
    /// Number of lock stripes; writes to the same state always hash to the
    /// same stripe.
    pub stripe_count: usize,
    /// Whether to fsync after every journal append.
    pub fsync_on_append: bool,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            journal_path: PathBuf::from("data/state-journal.bin"),
            stripe_count: 64,
            fsync_on_append: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StateStoreConfig::default();
        assert_eq!(config.stripe_count, 64);
        assert!(config.fsync_on_append);
    }
}
