//! Contracts consumed from the embedding broker and its registry.
//!
//! Transit never touches local services directly: remote requests,
//! event delivery, node bookkeeping and descriptor building all go
//! through these seams. The broker owns request timeouts and context
//! reconstruction; transit hands payloads over verbatim.

use async_trait::async_trait;
use meshbus_lib::models::{CpuUsage, NodeInfo};
use serde_json::Value;

use crate::packet::{ErrorEnvelope, EventPayload, RequestPayload};

/// Broker-side callbacks the transit layer drives.
#[async_trait]
pub trait BrokerDelegate: Send + Sync {
    /// Stable identifier of the local node.
    fn node_id(&self) -> &str;

    /// Broadcast a local-only notification (`$transporter.connected`,
    /// `$transporter.disconnected`, `$node.pong`).
    async fn broadcast_local(&self, event: &str, data: Value);

    /// Execute a remote-originated request against local services.
    ///
    /// The broker rebuilds its caller context from the payload; the
    /// outcome becomes the RESPONSE sent back to the requester.
    async fn handle_remote_request(
        &self,
        request: RequestPayload,
    ) -> std::result::Result<Value, ErrorEnvelope>;

    /// Deliver a remote event to local services.
    async fn emit_local_services(&self, event: EventPayload);

    /// Descriptor of the local node, advertised in INFO packets.
    async fn local_node_info(&self) -> NodeInfo;

    /// Groups subscribed to an event, used as the group-broadcast
    /// fallback when the caller names none.
    async fn event_groups(&self, event: &str) -> Vec<String>;

    /// Current CPU load, carried by HEARTBEAT packets.
    async fn cpu_usage(&self) -> CpuUsage;
}

/// Node-table bookkeeping driven by discovery and liveness packets.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// A peer advertised its descriptor (INFO).
    async fn process_node_info(&self, sender: &str, info: NodeInfo);

    /// A peer left the mesh; `unexpected` is false for a graceful
    /// DISCONNECT packet.
    async fn node_disconnected(&self, node_id: &str, unexpected: bool);

    /// A peer reported liveness (HEARTBEAT).
    async fn node_heartbeat(&self, sender: &str, cpu: CpuUsage);
}
