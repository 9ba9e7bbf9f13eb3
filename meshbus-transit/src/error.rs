//! Error types for the Transit layer.

use crate::packet::ErrorEnvelope;
use thiserror::Error;

/// Result type alias for transit operations.
pub type Result<T> = std::result::Result<T, TransitError>;

/// Errors raised by the Transit layer.
///
/// Inbound-path errors are logged and dropped by the dispatcher; only
/// outbound-path errors surface to callers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransitError {
    /// Inbound frame carried no bytes
    #[error("Missing packet")]
    MissingPacket,

    /// Decoding yielded no payload
    #[error("Missing response payload")]
    MissingPayload,

    /// Peer speaks a different protocol version
    #[error("Protocol version mismatch from node '{sender}' (local: {local}, remote: {remote})")]
    ProtocolVersionMismatch {
        sender: String,
        local: String,
        remote: String,
    },

    /// Outgoing request table reached its configured cap
    #[error(
        "Outgoing request queue is full (action: {action}, node: {node_id}, size: {size}, limit: {limit})"
    )]
    QueueFull {
        action: String,
        node_id: String,
        size: usize,
        limit: usize,
    },

    /// Pending call aborted because the target peer disconnected
    #[error("Request '{action}' rejected, node '{node_id}' is disconnected")]
    RequestRejected { action: String, node_id: String },

    /// Error envelope reconstructed from a peer's RESPONSE
    #[error("{}", .0.message)]
    RemoteFailure(ErrorEnvelope),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transporter adapter errors
    #[error("Transporter error: {0}")]
    Transporter(String),

    /// Operation requires a connected transit
    #[error("Transit is not ready")]
    NotReady,
}

impl TransitError {
    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a transporter error
    pub fn transporter(msg: impl Into<String>) -> Self {
        Self::Transporter(msg.into())
    }

    /// Rebuild a peer failure from its RESPONSE envelope.
    ///
    /// The message is suffixed with the responding node and the
    /// envelope's `nodeID` falls back to the packet sender.
    pub fn remote(mut envelope: ErrorEnvelope, sender: &str) -> Self {
        envelope.message = format!("{} (NodeID: {})", envelope.message, sender);
        if envelope.node_id.is_none() {
            envelope.node_id = Some(sender.to_owned());
        }
        Self::RemoteFailure(envelope)
    }
}
