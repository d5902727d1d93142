//! # `TransportEnvelope`
//!
//! The universal wrapper for all node-to-node coordinator traffic.
//!
//! ## Routing Properties
//!
//! - **Correlation**: request/response flows reuse `correlation_id`.
//! - **Component addressing**: `component` selects the sequencer instance on
//!   the destination node (one per privacy contract).
//! - **Envelope authority**: `sender_node` is the sole source of truth for
//!   origin; payloads must not carry a duplicate sender field.
//! - **At-least-once**: receivers deduplicate on `message_id` within a
//!   bounded window.

use crate::ids::NodeName;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The universal message envelope for coordinator traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEnvelope {
    /// Unique id of this delivery; dedup key for at-least-once transports.
    pub message_id: Uuid,

    /// For responses: the `message_id` of the request being answered.
    pub correlation_id: Option<Uuid>,

    /// Sequencer instance on the destination node (one per privacy
    /// contract); the empty string addresses the node runtime itself.
    pub component: String,

    /// Origin node. Authoritative: payloads never duplicate this.
    pub sender_node: NodeName,

    /// Target node for delivery.
    pub destination_node: NodeName,

    /// Node to which any response should be routed. Usually the sender, but
    /// a forwarder keeps the original requester here.
    pub reply_to_node: NodeName,

    /// Discriminator naming the payload type (`"DelegationRequest"`, …).
    pub message_type: String,

    /// Encoded payload; the codec in the transport crate owns the format.
    pub payload: Vec<u8>,
}

impl TransportEnvelope {
    /// Build a fresh envelope with a random `message_id` and the reply path
    /// pointed back at the sender.
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        sender_node: NodeName,
        destination_node: NodeName,
        message_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id: None,
            component: component.into(),
            reply_to_node: sender_node.clone(),
            sender_node,
            destination_node,
            message_type: message_type.into(),
            payload,
        }
    }

    /// Mark this envelope as a response to `request`.
    #[must_use]
    pub fn in_reply_to(mut self, request: &TransportEnvelope) -> Self {
        self.correlation_id = Some(request.message_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> TransportEnvelope {
        TransportEnvelope::new(
            "contract-1",
            NodeName::new("node1"),
            NodeName::new("node2"),
            "DelegationRequest",
            vec![0xDE, 0xAD],
        )
    }

    #[test]
    fn test_reply_to_defaults_to_sender() {
        let env = envelope();
        assert_eq!(env.reply_to_node, env.sender_node);
    }

    #[test]
    fn test_correlation_links_request_and_response() {
        let request = envelope();
        let response = TransportEnvelope::new(
            "contract-1",
            NodeName::new("node2"),
            NodeName::new("node1"),
            "DelegationAck",
            vec![],
        )
        .in_reply_to(&request);

        assert_eq!(response.correlation_id, Some(request.message_id));
    }

    #[test]
    fn test_message_ids_are_unique_per_envelope() {
        assert_ne!(envelope().message_id, envelope().message_id);
    }
}
