//! In-memory wire for tests and single-process deployments.
//!
//! One bounded channel per registered node preserves per-sender FIFO (all
//! senders in one process share the destination's channel, which is
//! stricter than the contract requires).

use crate::errors::TransportError;
use crate::ports::WireTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::NodeName;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Frames queued for a node, oldest first.
pub type NodeInbox = mpsc::Receiver<Vec<u8>>;

/// Routes frames between nodes registered in the same process.
pub struct InMemoryNetwork {
    inboxes: Mutex<HashMap<NodeName, mpsc::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl InMemoryNetwork {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inboxes: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register `node` and return its inbox. Re-registering replaces the
    /// previous inbox (the old receiver starts reporting closed).
    pub fn register(&self, node: NodeName) -> NodeInbox {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.inboxes.lock().insert(node.clone(), tx);
        debug!(node = %node, "[veil-05] node registered on in-memory wire");
        rx
    }

    /// Drop a node's inbox; subsequent sends fail as unknown.
    pub fn deregister(&self, node: &NodeName) {
        self.inboxes.lock().remove(node);
    }
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl WireTransport for InMemoryNetwork {
    async fn deliver(&self, node: &NodeName, frame: Vec<u8>) -> Result<(), TransportError> {
        let sender = {
            let inboxes = self.inboxes.lock();
            inboxes.get(node).cloned()
        };
        let Some(sender) = sender else {
            return Err(TransportError::UnknownNode {
                node: node.to_string(),
            });
        };
        sender
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed {
                node: node.to_string(),
                reason: "inbox closed".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_to_registered_node() {
        let network = InMemoryNetwork::default();
        let mut inbox = network.register(NodeName::new("node1"));

        network
            .deliver(&NodeName::new("node1"), vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(inbox.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_node_rejected() {
        let network = InMemoryNetwork::default();
        let err = network
            .deliver(&NodeName::new("ghost"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownNode { .. }));
    }

    #[tokio::test]
    async fn test_fifo_per_destination() {
        let network = InMemoryNetwork::default();
        let mut inbox = network.register(NodeName::new("node1"));

        for n in 0u8..5 {
            network
                .deliver(&NodeName::new("node1"), vec![n])
                .await
                .unwrap();
        }
        for n in 0u8..5 {
            assert_eq!(inbox.recv().await.unwrap(), vec![n]);
        }
    }
}
