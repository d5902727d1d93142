//! # Transport Writer
//!
//! Outbound half of the transport: wraps payloads in envelopes, frames
//! them, and pushes them onto the wire with retry, back-off, and an overall
//! deadline per logical send.

use crate::codec::encode_frame;
use crate::config::TransportConfig;
use crate::errors::TransportError;
use crate::messages::{
    CoordinatorMessage, DelegationAck, DelegationRequest, EndorsementRequestMsg,
    EndorsementResponseMsg,
};
use crate::ports::WireTransport;
use shared_types::{NodeName, TransportEnvelope};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Writes coordinator messages to peer nodes.
pub struct TransportWriter {
    local_node: NodeName,
    /// Sequencer instance (privacy contract) these messages belong to.
    component: String,
    wire: Arc<dyn WireTransport>,
    config: TransportConfig,
}

impl TransportWriter {
    #[must_use]
    pub fn new(
        local_node: NodeName,
        component: impl Into<String>,
        wire: Arc<dyn WireTransport>,
        config: TransportConfig,
    ) -> Self {
        Self {
            local_node,
            component: component.into(),
            wire,
            config,
        }
    }

    #[must_use]
    pub fn local_node(&self) -> &NodeName {
        &self.local_node
    }

    /// Send one message, retrying transient failures with exponential
    /// back-off until the configured deadline or attempt cap.
    ///
    /// Returns the `message_id` assigned to the delivery.
    pub async fn send(
        &self,
        destination: &NodeName,
        message: &CoordinatorMessage,
        correlation_id: Option<Uuid>,
    ) -> Result<Uuid, TransportError> {
        let payload = message.encode_payload()?;
        let mut envelope = TransportEnvelope::new(
            self.component.clone(),
            self.local_node.clone(),
            destination.clone(),
            message.message_type(),
            payload,
        );
        envelope.correlation_id = correlation_id;
        let frame = encode_frame(&envelope)?;

        let deadline = Instant::now() + Duration::from_millis(self.config.send_deadline_ms);
        let mut attempt: u32 = 0;
        loop {
            let backoff = Duration::from_millis(self.config.retry.backoff_ms(attempt));
            if backoff > Duration::ZERO {
                if Instant::now() + backoff >= deadline {
                    return Err(TransportError::Timeout {
                        node: destination.to_string(),
                        message_type: message.message_type().to_owned(),
                    });
                }
                tokio::time::sleep(backoff).await;
            }

            match self.wire.deliver(destination, frame.clone()).await {
                Ok(()) => {
                    debug!(
                        to = %destination,
                        message_type = message.message_type(),
                        message_id = %envelope.message_id,
                        "[veil-05] message sent"
                    );
                    return Ok(envelope.message_id);
                }
                Err(e) if e.is_transient() && attempt + 1 < self.config.retry.max_attempts => {
                    warn!(
                        to = %destination,
                        message_type = message.message_type(),
                        attempt,
                        error = %e,
                        "[veil-05] send failed, will retry"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Ask `delegate` to take over sequencing of a transaction.
    pub async fn send_delegation_request(
        &self,
        delegate: &NodeName,
        request: DelegationRequest,
    ) -> Result<Uuid, TransportError> {
        self.send(delegate, &CoordinatorMessage::DelegationRequest(request), None)
            .await
    }

    /// Answer a delegation request, naming the final owner.
    pub async fn send_delegation_ack(
        &self,
        destination: &NodeName,
        ack: DelegationAck,
        correlation_id: Option<Uuid>,
    ) -> Result<Uuid, TransportError> {
        self.send(
            destination,
            &CoordinatorMessage::DelegationAck(ack),
            correlation_id,
        )
        .await
    }

    /// Ask a party on `destination` to endorse a transaction.
    pub async fn send_endorsement_request(
        &self,
        destination: &NodeName,
        request: EndorsementRequestMsg,
    ) -> Result<Uuid, TransportError> {
        self.send(
            destination,
            &CoordinatorMessage::EndorsementRequest(request),
            None,
        )
        .await
    }

    /// Answer an endorsement request.
    pub async fn send_endorsement_response(
        &self,
        destination: &NodeName,
        response: EndorsementResponseMsg,
        correlation_id: Option<Uuid>,
    ) -> Result<Uuid, TransportError> {
        self.send(
            destination,
            &CoordinatorMessage::EndorsementResponse(response),
            correlation_id,
        )
        .await
    }

    /// Fan an event out to a set of peers. Failures are logged per peer and
    /// do not stop the fan-out; the caller sees which peers failed.
    pub async fn broadcast(
        &self,
        peers: &[NodeName],
        message: &CoordinatorMessage,
    ) -> Vec<(NodeName, TransportError)> {
        let mut failures = Vec::new();
        for peer in peers {
            if peer == &self.local_node {
                continue;
            }
            if let Err(e) = self.send(peer, message, None).await {
                warn!(peer = %peer, error = %e, "[veil-05] event broadcast to peer failed");
                failures.push((peer.clone(), e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryNetwork;
    use crate::codec::decode_frame;
    use crate::config::RetryConfig;
    use crate::messages::TransactionBlocked;
    use async_trait::async_trait;
    use shared_types::TransactionId;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn blocked() -> CoordinatorMessage {
        CoordinatorMessage::TransactionBlocked(TransactionBlocked {
            transaction_id: TransactionId::random(),
        })
    }

    #[tokio::test]
    async fn test_send_wraps_and_frames() {
        let network = Arc::new(InMemoryNetwork::default());
        let mut inbox = network.register(NodeName::new("node2"));
        let writer = TransportWriter::new(
            NodeName::new("node1"),
            "contract-1",
            network,
            TransportConfig::default(),
        );

        let message = blocked();
        let message_id = writer
            .send(&NodeName::new("node2"), &message, None)
            .await
            .unwrap();

        let frame = inbox.recv().await.unwrap();
        let (envelope, _) = decode_frame(&frame).unwrap();
        assert_eq!(envelope.message_id, message_id);
        assert_eq!(envelope.sender_node, NodeName::new("node1"));
        assert_eq!(envelope.component, "contract-1");
        assert_eq!(envelope.message_type, "TransactionBlocked");
    }

    /// Wire that fails a fixed number of times before succeeding.
    struct FlakyWire {
        failures_left: AtomicU32,
        inner: Arc<InMemoryNetwork>,
    }

    #[async_trait]
    impl WireTransport for FlakyWire {
        async fn deliver(&self, node: &NodeName, frame: Vec<u8>) -> Result<(), TransportError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::SendFailed {
                    node: node.to_string(),
                    reason: "induced".into(),
                });
            }
            self.inner.deliver(node, frame).await
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let network = Arc::new(InMemoryNetwork::default());
        let mut inbox = network.register(NodeName::new("node2"));
        let wire = Arc::new(FlakyWire {
            failures_left: AtomicU32::new(2),
            inner: Arc::clone(&network),
        });
        let config = TransportConfig {
            retry: RetryConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                multiplier: 2,
                max_attempts: 5,
            },
            ..Default::default()
        };
        let writer = TransportWriter::new(NodeName::new("node1"), "c", wire, config);

        writer
            .send(&NodeName::new("node2"), &blocked(), None)
            .await
            .unwrap();
        assert!(inbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_retry_budget_exhausts() {
        let wire = Arc::new(FlakyWire {
            failures_left: AtomicU32::new(u32::MAX),
            inner: Arc::new(InMemoryNetwork::default()),
        });
        let config = TransportConfig {
            retry: RetryConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                multiplier: 2,
                max_attempts: 3,
            },
            ..Default::default()
        };
        let writer = TransportWriter::new(NodeName::new("node1"), "c", wire, config);

        let err = writer
            .send(&NodeName::new("node2"), &blocked(), None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unknown_node_not_retried() {
        let network = Arc::new(InMemoryNetwork::default());
        let writer = TransportWriter::new(
            NodeName::new("node1"),
            "c",
            network,
            TransportConfig::default(),
        );
        let err = writer
            .send(&NodeName::new("ghost"), &blocked(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownNode { .. }));
    }

    #[tokio::test]
    async fn test_broadcast_skips_self_and_collects_failures() {
        let network = Arc::new(InMemoryNetwork::default());
        let mut inbox2 = network.register(NodeName::new("node2"));
        let writer = TransportWriter::new(
            NodeName::new("node1"),
            "c",
            network,
            TransportConfig::default(),
        );

        let failures = writer
            .broadcast(
                &[
                    NodeName::new("node1"),
                    NodeName::new("node2"),
                    NodeName::new("ghost"),
                ],
                &blocked(),
            )
            .await;

        assert!(inbox2.recv().await.is_some());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, NodeName::new("ghost"));
    }
}
