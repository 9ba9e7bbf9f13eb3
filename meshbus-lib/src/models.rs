//! Node descriptor models exchanged during discovery.
//!
//! A node advertises its capabilities in INFO packets as a [`NodeInfo`]
//! descriptor; HEARTBEAT packets carry a [`CpuUsage`] sample. Field
//! names follow the wire protocol's camelCase convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Capability descriptor a node advertises in INFO packets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Services hosted by the node
    pub services: Vec<ServiceInfo>,
    /// Network addresses the node is reachable on
    pub ip_list: Vec<String>,
    /// Host name of the machine running the node
    pub hostname: String,
    /// Implementation identification
    pub client: ClientInfo,
    /// Identifier regenerated on every process start
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    /// Monotonically increasing descriptor revision
    pub seq: u64,
    /// Broker configuration shared with peers
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Free-form node metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl NodeInfo {
    /// Create an empty descriptor with a fresh instance id.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            services: Vec::new(),
            ip_list: Vec::new(),
            hostname: hostname.into(),
            client: ClientInfo::default(),
            instance_id: Uuid::new_v4().to_string(),
            seq: 1,
            config: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Add a hosted service to the descriptor.
    pub fn with_service(mut self, service: ServiceInfo) -> Self {
        self.services.push(service);
        self
    }
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Descriptor of one service hosted by a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    /// Service name
    pub name: String,
    /// Optional service version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Version-qualified name used for routing
    pub full_name: String,
    /// Free-form service settings
    #[serde(default)]
    pub settings: HashMap<String, Value>,
    /// Callable action names
    pub actions: Vec<String>,
    /// Subscribed event names
    pub events: Vec<String>,
}

impl ServiceInfo {
    /// Create a service descriptor with no actions or events.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            version: None,
            settings: HashMap::new(),
            actions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }
}

/// Implementation identification advertised alongside services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Implementation type
    #[serde(rename = "type")]
    pub client_type: String,
    /// Implementation version
    pub version: String,
    /// Language/runtime version
    #[serde(rename = "langVersion")]
    pub lang_version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            client_type: "rust".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            lang_version: "unknown".to_owned(),
        }
    }
}

/// CPU load sample carried by HEARTBEAT packets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CpuUsage {
    /// Load percentage in the 0..=100 range, if known
    #[serde(default)]
    pub cpu: Option<f64>,
    /// Sample sequence number
    #[serde(default)]
    pub cpu_seq: u64,
}
