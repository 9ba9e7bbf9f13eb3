//! Payload serialization seam.
//!
//! The transit layer owns the command → payload-shape mapping; the
//! serializer owns the byte representation. The default implementation
//! is JSON, because payloads embed free-form `serde_json::Value`
//! fields that require a self-describing format.

use crate::error::{Result, TransitError};
use crate::packet::{PacketPayload, PacketType};
use serde::de::DeserializeOwned;

/// Bytes ↔ payload codec keyed by the packet command.
pub trait PacketSerializer: Send + Sync {
    /// Serialize a payload to wire bytes.
    fn serialize(&self, payload: &PacketPayload) -> Result<Vec<u8>>;

    /// Deserialize wire bytes into the payload shape of `kind`.
    fn deserialize(&self, kind: PacketType, data: &[u8]) -> Result<PacketPayload>;
}

/// JSON implementation of [`PacketSerializer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| TransitError::serialization(e.to_string()))
}

impl PacketSerializer for JsonSerializer {
    fn serialize(&self, payload: &PacketPayload) -> Result<Vec<u8>> {
        let result = match payload {
            PacketPayload::Event(p) => serde_json::to_vec(p),
            PacketPayload::Request(p) => serde_json::to_vec(p),
            PacketPayload::Response(p) => serde_json::to_vec(p),
            PacketPayload::Discover(p) => serde_json::to_vec(p),
            PacketPayload::Info(p) => serde_json::to_vec(p),
            PacketPayload::Disconnect(p) => serde_json::to_vec(p),
            PacketPayload::Heartbeat(p) => serde_json::to_vec(p),
            PacketPayload::Ping(p) => serde_json::to_vec(p),
            PacketPayload::Pong(p) => serde_json::to_vec(p),
        };
        result.map_err(|e| TransitError::serialization(e.to_string()))
    }

    fn deserialize(&self, kind: PacketType, data: &[u8]) -> Result<PacketPayload> {
        Ok(match kind {
            PacketType::Event => PacketPayload::Event(decode(data)?),
            PacketType::Request => PacketPayload::Request(decode(data)?),
            PacketType::Response => PacketPayload::Response(decode(data)?),
            PacketType::Discover => PacketPayload::Discover(decode(data)?),
            PacketType::Info => PacketPayload::Info(decode(data)?),
            PacketType::Disconnect => PacketPayload::Disconnect(decode(data)?),
            PacketType::Heartbeat => PacketPayload::Heartbeat(decode(data)?),
            PacketType::Ping => PacketPayload::Ping(decode(data)?),
            PacketType::Pong => PacketPayload::Pong(decode(data)?),
        })
    }
}
