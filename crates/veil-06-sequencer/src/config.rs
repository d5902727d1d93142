//! Sequencer configuration.

use serde::{Deserialize, Serialize};

/// Per-instance configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Capacity of the inbound event queue.
    pub event_queue_capacity: usize,
    /// Capacity of the outbound work queue. Enqueueing blocks when full;
    /// this is the back-pressure boundary.
    pub outbound_queue_capacity: usize,
    /// Worker tasks draining the outbound queue.
    pub outbound_workers: usize,
    /// Endorsement re-requests allowed per party before a refusal becomes a
    /// revert.
    pub endorsement_retry_limit: u32,
    /// Blocks to remember confirmed transactions for re-org cascades.
    pub max_reorg_depth: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            outbound_queue_capacity: 256,
            outbound_workers: 4,
            endorsement_retry_limit: 3,
            max_reorg_depth: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SequencerConfig::default();
        assert_eq!(config.event_queue_capacity, 1024);
        assert_eq!(config.outbound_workers, 4);
        assert_eq!(config.max_reorg_depth, 100);
    }
}
