//! Packet types and wire payload shapes for the transit protocol.
//!
//! Every payload carries the protocol version tag and the sender's
//! node id; the command itself travels in the topic name, not in the
//! payload. Field names follow the wire protocol's camelCase
//! convention where they differ from Rust style.

use meshbus_lib::models::{CpuUsage, NodeInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::topic::Topic;

/// Protocol version stamped on every payload; mismatching packets are
/// dropped by the dispatcher.
pub const PROTOCOL_VERSION: &str = "4";

/// Commands of the transit protocol (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Event,
    Request,
    Response,
    Discover,
    Info,
    Disconnect,
    Heartbeat,
    Ping,
    Pong,
}

impl PacketType {
    /// All commands, in protocol declaration order.
    pub const ALL: [Self; 9] = [
        Self::Event,
        Self::Request,
        Self::Response,
        Self::Discover,
        Self::Info,
        Self::Disconnect,
        Self::Heartbeat,
        Self::Ping,
        Self::Pong,
    ];

    /// The wire name of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "EVENT",
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::Discover => "DISCOVER",
            Self::Info => "INFO",
            Self::Disconnect => "DISCONNECT",
            Self::Heartbeat => "HEARTBEAT",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }

    /// Parse a wire command name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote event delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventPayload {
    pub ver: String,
    pub sender: String,
    /// Event name
    pub event: String,
    /// Event payload
    pub data: Value,
    /// Consumer groups the event is addressed to; `None` means all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl EventPayload {
    pub fn new(
        sender: impl Into<String>,
        event: impl Into<String>,
        data: Value,
        groups: Option<Vec<String>>,
    ) -> Self {
        Self {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: sender.into(),
            event: event.into(),
            data,
            groups,
        }
    }
}

/// Remote action call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestPayload {
    pub ver: String,
    pub sender: String,
    /// Correlation id matched against the RESPONSE
    pub id: String,
    /// Action name
    pub action: String,
    /// Action parameters
    pub params: Value,
    /// Caller metadata propagated across hops
    pub meta: Value,
    /// Remaining caller-side timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Call-chain depth
    pub level: u32,
    /// Whether the caller requested metrics for this call
    pub metrics: bool,
    /// Id of the parent call in the chain
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Id of the root call in the chain
    #[serde(rename = "requestID", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Reply to a [`RequestPayload`], correlated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponsePayload {
    pub ver: String,
    pub sender: String,
    /// Correlation id of the originating request
    pub id: String,
    /// Whether the remote call succeeded
    pub success: bool,
    /// Call result when `success` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure envelope when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

/// Wire representation of a peer-side failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    /// Error class name
    pub name: String,
    /// Human-readable message
    pub message: String,
    /// Numeric error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    /// Machine-readable error type tag
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Node the failure originated on
    #[serde(rename = "nodeID", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Structured error details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Remote stack trace, kept as an opaque string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorEnvelope {
    /// Envelope used when a failed RESPONSE arrives without one.
    pub fn unknown(sender: &str) -> Self {
        Self {
            name: "UnknownError".to_owned(),
            message: "Unknown remote error".to_owned(),
            code: Some(500),
            error_type: None,
            node_id: Some(sender.to_owned()),
            data: None,
            stack: None,
        }
    }
}

/// Peer discovery probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverPayload {
    pub ver: String,
    pub sender: String,
}

/// Capability descriptor exchange, the reply to DISCOVER.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfoPayload {
    pub ver: String,
    pub sender: String,
    /// Node descriptor
    #[serde(flatten)]
    pub info: NodeInfo,
}

/// Graceful departure notice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisconnectPayload {
    pub ver: String,
    pub sender: String,
}

/// Periodic liveness beacon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatPayload {
    pub ver: String,
    pub sender: String,
    /// CPU load sample
    #[serde(flatten)]
    pub cpu: CpuUsage,
}

/// Round-trip probe; `time` is the sender's clock at send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PingPayload {
    pub ver: String,
    pub sender: String,
    /// Sender's clock at send time, milliseconds since the epoch
    pub time: i64,
}

/// Reply to PING; echoes `time` and stamps the receipt clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PongPayload {
    pub ver: String,
    pub sender: String,
    /// Echo of the probe's send time
    pub time: i64,
    /// Responder's clock at receipt, milliseconds since the epoch
    pub arrived: i64,
}

/// Payload of any transit command.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketPayload {
    Event(EventPayload),
    Request(RequestPayload),
    Response(ResponsePayload),
    Discover(DiscoverPayload),
    Info(InfoPayload),
    Disconnect(DisconnectPayload),
    Heartbeat(HeartbeatPayload),
    Ping(PingPayload),
    Pong(PongPayload),
}

impl PacketPayload {
    /// The command this payload belongs to.
    pub fn kind(&self) -> PacketType {
        match self {
            Self::Event(_) => PacketType::Event,
            Self::Request(_) => PacketType::Request,
            Self::Response(_) => PacketType::Response,
            Self::Discover(_) => PacketType::Discover,
            Self::Info(_) => PacketType::Info,
            Self::Disconnect(_) => PacketType::Disconnect,
            Self::Heartbeat(_) => PacketType::Heartbeat,
            Self::Ping(_) => PacketType::Ping,
            Self::Pong(_) => PacketType::Pong,
        }
    }

    /// The protocol version tag of the payload.
    pub fn ver(&self) -> &str {
        match self {
            Self::Event(p) => &p.ver,
            Self::Request(p) => &p.ver,
            Self::Response(p) => &p.ver,
            Self::Discover(p) => &p.ver,
            Self::Info(p) => &p.ver,
            Self::Disconnect(p) => &p.ver,
            Self::Heartbeat(p) => &p.ver,
            Self::Ping(p) => &p.ver,
            Self::Pong(p) => &p.ver,
        }
    }

    /// The originating node id.
    pub fn sender(&self) -> &str {
        match self {
            Self::Event(p) => &p.sender,
            Self::Request(p) => &p.sender,
            Self::Response(p) => &p.sender,
            Self::Discover(p) => &p.sender,
            Self::Info(p) => &p.sender,
            Self::Disconnect(p) => &p.sender,
            Self::Heartbeat(p) => &p.sender,
            Self::Ping(p) => &p.sender,
            Self::Pong(p) => &p.sender,
        }
    }
}

/// A routable unit: payload plus an optional target node.
///
/// Packets without a target are published on the command's broadcast
/// topic; targeted packets go to `MBUS.<CMD>.<nodeID>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Target node, `None` for broadcast
    pub target: Option<String>,
    /// Command payload
    pub payload: PacketPayload,
}

impl Packet {
    pub fn new(target: Option<String>, payload: PacketPayload) -> Self {
        Self { target, payload }
    }

    /// The command of the packet.
    pub fn kind(&self) -> PacketType {
        self.payload.kind()
    }

    /// The topic this packet is published on.
    pub fn topic(&self) -> Topic {
        Topic::new(self.kind(), self.target.clone())
    }
}
