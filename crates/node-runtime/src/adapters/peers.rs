//! Peer directory adapters.

use crate::registry::TransportDetailsRegistry;
use shared_types::NodeName;
use std::sync::Arc;
use veil_06_sequencer::ports::PeerDirectory;

/// Fixed peer list from configuration.
pub struct StaticPeerDirectory {
    peers: Vec<NodeName>,
}

impl StaticPeerDirectory {
    #[must_use]
    pub fn new(peers: Vec<NodeName>) -> Self {
        Self { peers }
    }
}

impl PeerDirectory for StaticPeerDirectory {
    fn peers(&self) -> Vec<NodeName> {
        self.peers.clone()
    }
}

/// Peers discovered through the transport-details registry, excluding this
/// node.
pub struct RegistryPeerDirectory {
    registry: Arc<TransportDetailsRegistry>,
    local: NodeName,
}

impl RegistryPeerDirectory {
    #[must_use]
    pub fn new(registry: Arc<TransportDetailsRegistry>, local: NodeName) -> Self {
        Self { registry, local }
    }
}

impl PeerDirectory for RegistryPeerDirectory {
    fn peers(&self) -> Vec<NodeName> {
        self.registry
            .known_nodes()
            .into_iter()
            .filter(|node| node != &self.local)
            .collect()
    }
}
