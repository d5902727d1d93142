//! # Transport Details Registry
//!
//! Stores how to reach each node: rows of `(registry, node, transport,
//! details)` with last-write-wins on the key triple. Lookups go through a
//! per-node cache that upserts invalidate wholesale, since entries only
//! arrive complete.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared_types::NodeName;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDetails {
    pub registry: String,
    pub node: String,
    pub transport: String,
    /// Opaque dial information for the named transport.
    pub details: String,
}

/// Rejected registry writes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Rows must name both a node and a transport.
    #[error("registry entry missing node or transport")]
    IncompleteEntry,
}

type RowKey = (String, String, String);

/// In-memory registry with last-write-wins upsert semantics.
#[derive(Default)]
pub struct TransportDetailsRegistry {
    rows: RwLock<BTreeMap<RowKey, TransportDetails>>,
    cache: RwLock<HashMap<String, Vec<TransportDetails>>>,
}

impl TransportDetailsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a batch of rows atomically; the per-node cache entries of
    /// every touched node are invalidated after the write.
    pub fn upsert_batch(&self, entries: Vec<TransportDetails>) -> Result<(), RegistryError> {
        for entry in &entries {
            if entry.node.is_empty() || entry.transport.is_empty() {
                return Err(RegistryError::IncompleteEntry);
            }
        }

        let mut touched: Vec<String> = Vec::new();
        {
            let mut rows = self.rows.write();
            for entry in entries {
                touched.push(entry.node.clone());
                let key = (
                    entry.registry.clone(),
                    entry.node.clone(),
                    entry.transport.clone(),
                );
                // Last write wins on (registry, node, transport).
                rows.insert(key, entry);
            }
        }

        let mut cache = self.cache.write();
        for node in touched {
            cache.remove(&node);
            debug!(node, "[veil-node] transport details cache invalidated");
        }
        Ok(())
    }

    /// Every known transport row for a node, cached after first read.
    #[must_use]
    pub fn lookup(&self, node: &NodeName) -> Vec<TransportDetails> {
        if let Some(cached) = self.cache.read().get(node.as_str()) {
            return cached.clone();
        }
        let rows: Vec<TransportDetails> = self
            .rows
            .read()
            .values()
            .filter(|row| row.node == node.as_str())
            .cloned()
            .collect();
        self.cache
            .write()
            .insert(node.as_str().to_owned(), rows.clone());
        rows
    }

    /// All nodes with at least one registered transport.
    #[must_use]
    pub fn known_nodes(&self) -> Vec<NodeName> {
        let rows = self.rows.read();
        let mut nodes: Vec<String> = rows.values().map(|r| r.node.clone()).collect();
        nodes.sort();
        nodes.dedup();
        nodes.into_iter().map(NodeName::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(registry: &str, node: &str, transport: &str, details: &str) -> TransportDetails {
        TransportDetails {
            registry: registry.into(),
            node: node.into(),
            transport: transport.into(),
            details: details.into(),
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let registry = TransportDetailsRegistry::new();
        registry
            .upsert_batch(vec![
                row("r1", "node1", "grpc", "dns:node1:9000"),
                row("r1", "node2", "grpc", "dns:node2:9000"),
            ])
            .unwrap();

        let details = registry.lookup(&NodeName::new("node1"));
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].details, "dns:node1:9000");
    }

    #[test]
    fn test_last_write_wins_on_key_triple() {
        let registry = TransportDetailsRegistry::new();
        registry
            .upsert_batch(vec![row("r1", "node1", "grpc", "old")])
            .unwrap();
        // Prime the cache, then overwrite.
        assert_eq!(registry.lookup(&NodeName::new("node1"))[0].details, "old");

        registry
            .upsert_batch(vec![row("r1", "node1", "grpc", "new")])
            .unwrap();
        let details = registry.lookup(&NodeName::new("node1"));
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].details, "new");
    }

    #[test]
    fn test_distinct_transports_coexist() {
        let registry = TransportDetailsRegistry::new();
        registry
            .upsert_batch(vec![
                row("r1", "node1", "grpc", "dns:node1:9000"),
                row("r1", "node1", "websocket", "wss://node1"),
            ])
            .unwrap();
        assert_eq!(registry.lookup(&NodeName::new("node1")).len(), 2);
    }

    #[test]
    fn test_incomplete_entry_rejected() {
        let registry = TransportDetailsRegistry::new();
        let result = registry.upsert_batch(vec![row("r1", "", "grpc", "x")]);
        assert_eq!(result, Err(RegistryError::IncompleteEntry));
    }

    #[test]
    fn test_known_nodes_sorted_unique() {
        let registry = TransportDetailsRegistry::new();
        registry
            .upsert_batch(vec![
                row("r1", "node2", "grpc", "b"),
                row("r1", "node1", "grpc", "a"),
                row("r2", "node1", "websocket", "c"),
            ])
            .unwrap();
        assert_eq!(
            registry.known_nodes(),
            vec![NodeName::new("node1"), NodeName::new("node2")]
        );
    }
}
