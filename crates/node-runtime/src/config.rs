//! Node configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use veil_01_state_store::StateStoreConfig;
use veil_05_transport::TransportConfig;
use veil_06_sequencer::SequencerConfig;

/// Key manager variants are tagged configurations, not trait hierarchies:
/// picking one is a deployment decision, not a type relationship.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyManagerConfig {
    /// Fixed identifier-to-secret map from the config file.
    Static {
        /// identifier -> hex-encoded secret
        keys: std::collections::BTreeMap<String, String>,
    },
    /// One secret file per identifier under a directory.
    Filesystem { path: PathBuf },
    /// Secrets derived from one seed per identifier.
    Derived {
        /// hex-encoded seed
        seed: String,
    },
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self::Derived {
            seed: "00".repeat(32),
        }
    }
}

/// Complete configuration of one node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's name, as peers address it.
    pub node_name: String,
    /// Directory for journals and logs.
    pub data_dir: PathBuf,
    /// Privacy contract instances this node sequences, one component each.
    pub contracts: Vec<String>,
    /// Peer nodes that receive event broadcasts.
    pub peers: Vec<String>,
    /// Identifier used to sign base-ledger submissions.
    pub submitter_identifier: String,
    pub state_store: StateStoreConfig,
    pub transport: TransportConfig,
    pub sequencer: SequencerConfig,
    pub key_manager: KeyManagerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "node1".into(),
            data_dir: PathBuf::from("./data"),
            contracts: vec!["contract-1".into()],
            peers: Vec::new(),
            submitter_identifier: "submitter".into(),
            state_store: StateStoreConfig::default(),
            transport: TransportConfig::default(),
            sequencer: SequencerConfig::default(),
            key_manager: KeyManagerConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut config: Self = serde_json::from_slice(&bytes)?;
        // The journal lives under the data dir unless explicitly placed.
        if config.state_store.journal_path.is_relative() {
            config.state_store.journal_path =
                config.data_dir.join(&config.state_store.journal_path);
        }
        Ok(config)
    }
}
