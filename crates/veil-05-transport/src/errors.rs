//! Transport error types.

use thiserror::Error;

/// Errors in the transport layer.
///
/// `MalformedFrame` and `UnknownMessageType` are protocol errors: the
/// offending message is dropped and nothing else changes. `SendFailed` and
/// `Timeout` are transient and retried with back-off.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame failed magic, length, or decode checks.
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// The envelope names a payload type this node does not understand.
    #[error("unknown message type: {message_type}")]
    UnknownMessageType { message_type: String },

    /// Payload bytes did not decode as the type the envelope names.
    #[error("malformed payload for {message_type}: {reason}")]
    MalformedPayload {
        message_type: String,
        reason: String,
    },

    /// The underlying wire rejected the send; transient.
    #[error("send to {node} failed: {reason}")]
    SendFailed { node: String, reason: String },

    /// No route to the destination node.
    #[error("no transport details registered for node {node}")]
    UnknownNode { node: String },

    /// The send deadline expired before delivery was handed off.
    #[error("deadline expired sending {message_type} to {node}")]
    Timeout {
        node: String,
        message_type: String,
    },
}

impl TransportError {
    /// Whether a retry with back-off is worthwhile.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SendFailed { .. } | Self::Timeout { .. })
    }
}
