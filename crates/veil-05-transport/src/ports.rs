//! Outbound port of the transport layer.
//!
//! The coordinator does not own sockets; a wire implementation (in-memory
//! for tests and single-process deployments, a real network stack in
//! production) sits behind this trait.

use crate::errors::TransportError;
use async_trait::async_trait;
use shared_types::NodeName;

/// Delivers raw frames to peer nodes.
///
/// Delivery is at-least-once: an implementation may duplicate but must not
/// reorder frames from one sender to one destination.
#[async_trait]
pub trait WireTransport: Send + Sync {
    async fn deliver(&self, node: &NodeName, frame: Vec<u8>) -> Result<(), TransportError>;
}
