//! # Transport Reader
//!
//! Inbound half of the transport: decodes frames, enforces the dedup
//! window, and hands decoded messages to the sequencer instance the
//! envelope's `component` field names. Frames are handled in arrival order,
//! which preserves the wire's per-sender FIFO.

use crate::codec::decode_frame;
use crate::config::TransportConfig;
use crate::dedup::DeliveryWindow;
use crate::errors::TransportError;
use crate::messages::CoordinatorMessage;
use parking_lot::Mutex;
use shared_types::NodeName;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A decoded inbound message plus the envelope routing fields a handler
/// needs.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub sender_node: NodeName,
    pub reply_to_node: NodeName,
    pub component: String,
    pub message: CoordinatorMessage,
}

/// What became of one inbound frame.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Decoded and queued for its component.
    Delivered,
    /// Seen before within the dedup window; dropped without effect.
    Duplicate,
    /// Addressed to a different node; dropped.
    NotForThisNode,
    /// Malformed or unroutable; logged and dropped with no state change.
    Dropped(TransportError),
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Routes inbound frames to per-component handler queues.
pub struct TransportReader {
    local_node: NodeName,
    dedup: Mutex<DeliveryWindow>,
    components: Mutex<HashMap<String, mpsc::Sender<InboundMessage>>>,
}

impl TransportReader {
    #[must_use]
    pub fn new(local_node: NodeName, config: &TransportConfig) -> Self {
        Self {
            local_node,
            dedup: Mutex::new(DeliveryWindow::new(
                Duration::from_secs(config.dedup_window_secs),
                config.dedup_max_entries,
            )),
            components: Mutex::new(HashMap::new()),
        }
    }

    /// Register the inbound queue of a sequencer instance.
    pub fn register_component(&self, component: impl Into<String>, queue: mpsc::Sender<InboundMessage>) {
        self.components.lock().insert(component.into(), queue);
    }

    /// Drop a component registration on instance shutdown.
    pub fn deregister_component(&self, component: &str) {
        self.components.lock().remove(component);
    }

    /// Handle one frame off the wire.
    ///
    /// Enqueueing into a full component queue awaits; that is the inbound
    /// back-pressure boundary.
    pub async fn handle_frame(&self, frame: &[u8]) -> DeliveryOutcome {
        let (envelope, _) = match decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "[veil-05] dropping malformed frame");
                return DeliveryOutcome::Dropped(e);
            }
        };

        if envelope.destination_node != self.local_node {
            warn!(
                destination = %envelope.destination_node,
                local = %self.local_node,
                "[veil-05] dropping frame addressed to another node"
            );
            return DeliveryOutcome::NotForThisNode;
        }

        if !self.dedup.lock().observe(envelope.message_id) {
            debug!(message_id = %envelope.message_id, "[veil-05] duplicate delivery ignored");
            return DeliveryOutcome::Duplicate;
        }

        let message =
            match CoordinatorMessage::decode_payload(&envelope.message_type, &envelope.payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        message_type = envelope.message_type,
                        sender = %envelope.sender_node,
                        error = %e,
                        "[veil-05] dropping undecodable message"
                    );
                    return DeliveryOutcome::Dropped(e);
                }
            };

        let queue = {
            let components = self.components.lock();
            components.get(&envelope.component).cloned()
        };
        let Some(queue) = queue else {
            let e = TransportError::SendFailed {
                node: self.local_node.to_string(),
                reason: format!("no component {:?} registered", envelope.component),
            };
            warn!(component = envelope.component, "[veil-05] dropping message for unknown component");
            return DeliveryOutcome::Dropped(e);
        };

        let inbound = InboundMessage {
            message_id: envelope.message_id,
            correlation_id: envelope.correlation_id,
            sender_node: envelope.sender_node,
            reply_to_node: envelope.reply_to_node,
            component: envelope.component,
            message,
        };
        match queue.send(inbound).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(_) => {
                warn!("[veil-05] component queue closed, dropping message");
                DeliveryOutcome::Dropped(TransportError::SendFailed {
                    node: self.local_node.to_string(),
                    reason: "component queue closed".into(),
                })
            }
        }
    }

    /// Drain a node inbox into this reader until the inbox closes.
    pub async fn pump(&self, mut inbox: mpsc::Receiver<Vec<u8>>) {
        while let Some(frame) = inbox.recv().await {
            let _ = self.handle_frame(&frame).await;
        }
        debug!(node = %self.local_node, "[veil-05] inbound wire closed");
    }
}
