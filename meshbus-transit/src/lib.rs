#![forbid(unsafe_code)]

//! meshbus-transit: the wire-facing Transit layer of the meshbus mesh.
//!
//! Transit translates a service broker's local calls, events, and
//! lifecycle signals into a pub/sub wire protocol that ties peer nodes
//! into one logical mesh. Remote callers see request/response
//! semantics; underneath, Transit multiplexes requests by correlation
//! id, tracks pending calls, discovers peers, exchanges capability
//! descriptors, and measures liveness.
//!
//! ## Layout
//!
//! - [`packet`] — the nine-command packet protocol and its version tag
//! - [`topic`] — topic naming and the fixed core subscription set
//! - [`serializer`] — bytes ↔ payload seam with a JSON default
//! - [`pending`] — the pending-request table keyed by correlation id
//! - [`transporter`] — the abstract pub/sub adapter, plus an
//!   in-process implementation for tests and embedded meshes
//! - [`broker`] — contracts consumed from the embedding broker
//! - [`transit`] — the engine: dispatcher, outbound API, lifecycle,
//!   liveness
//!
//! ## Basic usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meshbus_lib::config::TransitConfig;
//! use meshbus_transit::{MemoryHub, MemoryTransporter, RequestContext, Transit};
//!
//! # async fn example(broker: Arc<dyn meshbus_transit::BrokerDelegate>,
//! #                  registry: Arc<dyn meshbus_transit::NodeRegistry>) {
//! let hub = MemoryHub::new();
//! let transporter = Arc::new(MemoryTransporter::new("node-1", hub));
//! let transit = Transit::new(TransitConfig::default(), broker, registry, transporter);
//! transit.connect().await.expect("connect");
//!
//! let ctx = RequestContext::new("math.add", serde_json::json!({"a": 2, "b": 3}))
//!     .targeted("node-2");
//! let reply = transit.request(ctx).await.expect("publish");
//! let result = reply.await.expect("completion");
//! # }
//! ```

pub mod broker;
pub mod error;
pub mod packet;
pub mod pending;
pub mod serializer;
pub mod topic;
pub mod transit;
pub mod transporter;

pub use broker::{BrokerDelegate, NodeRegistry};
pub use error::{Result, TransitError};
pub use packet::{
    ErrorEnvelope, PROTOCOL_VERSION, Packet, PacketPayload, PacketType,
};
pub use pending::{PendingReply, PendingStore, RequestContext};
pub use serializer::{JsonSerializer, PacketSerializer};
pub use topic::Topic;
pub use transit::Transit;
pub use transporter::{InboundFrame, MemoryHub, MemoryTransporter, Transporter};

use serde::{Deserialize, Serialize};

/// Snapshot of the transit packet counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitStats {
    /// Total packets published to the transporter
    pub packets_sent: u64,
    /// Total packets accepted by the inbound dispatcher
    pub packets_received: u64,
}
