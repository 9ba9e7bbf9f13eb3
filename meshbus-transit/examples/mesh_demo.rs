//! Two-node mesh over the in-process transporter: discovery, a remote
//! request, and a PING/PONG round trip.
//!
//! Run with: `cargo run --example mesh_demo`

use async_trait::async_trait;
use meshbus_lib::config::Config;
use meshbus_lib::models::{CpuUsage, NodeInfo, ServiceInfo};
use meshbus_transit::packet::{ErrorEnvelope, EventPayload, RequestPayload};
use meshbus_transit::{
    BrokerDelegate, MemoryHub, MemoryTransporter, NodeRegistry, RequestContext, Transit,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Minimal broker hosting one `math` service.
struct DemoBroker {
    node_id: String,
}

#[async_trait]
impl BrokerDelegate for DemoBroker {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn broadcast_local(&self, event: &str, data: Value) {
        tracing::info!("[{}] local event {}: {}", self.node_id, event, data);
    }

    async fn handle_remote_request(
        &self,
        request: RequestPayload,
    ) -> Result<Value, ErrorEnvelope> {
        match request.action.as_str() {
            "math.add" => {
                let a = request.params["a"].as_i64().unwrap_or_default();
                let b = request.params["b"].as_i64().unwrap_or_default();
                Ok(json!(a + b))
            }
            action => Err(ErrorEnvelope {
                name: "ServiceNotFoundError".to_owned(),
                message: format!("Action '{action}' is not available"),
                code: Some(404),
                error_type: Some("SERVICE_NOT_FOUND".to_owned()),
                node_id: None,
                data: None,
                stack: None,
            }),
        }
    }

    async fn emit_local_services(&self, event: EventPayload) {
        tracing::info!("[{}] event '{}' from {}", self.node_id, event.event, event.sender);
    }

    async fn local_node_info(&self) -> NodeInfo {
        NodeInfo::new(format!("{}-host", self.node_id))
            .with_service(ServiceInfo::new("math").with_action("math.add"))
    }

    async fn event_groups(&self, _event: &str) -> Vec<String> {
        Vec::new()
    }

    async fn cpu_usage(&self) -> CpuUsage {
        CpuUsage::default()
    }
}

/// Registry that just narrates what it learns.
struct DemoRegistry {
    node_id: String,
}

#[async_trait]
impl NodeRegistry for DemoRegistry {
    async fn process_node_info(&self, sender: &str, info: NodeInfo) {
        tracing::info!(
            "[{}] node '{}' offers {} services",
            self.node_id,
            sender,
            info.services.len()
        );
    }

    async fn node_disconnected(&self, node_id: &str, unexpected: bool) {
        tracing::info!(
            "[{}] node '{}' left (unexpected: {})",
            self.node_id,
            node_id,
            unexpected
        );
    }

    async fn node_heartbeat(&self, sender: &str, cpu: CpuUsage) {
        tracing::debug!("[{}] heartbeat from '{}': {:?}", self.node_id, sender, cpu);
    }
}

fn spawn_node(hub: &Arc<MemoryHub>, node_id: &str) -> Arc<Transit> {
    let config = Config::default();
    let broker = Arc::new(DemoBroker {
        node_id: node_id.to_owned(),
    });
    let registry = Arc::new(DemoRegistry {
        node_id: node_id.to_owned(),
    });
    let transporter = Arc::new(MemoryTransporter::new(node_id, Arc::clone(hub)));
    Transit::new(config.transit, broker, registry, transporter)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(None)?;
    meshbus_lib::logging::init(&config.logging);

    let hub = MemoryHub::new();
    let alpha = spawn_node(&hub, "alpha");
    let beta = spawn_node(&hub, "beta");

    alpha.connect().await?;
    beta.connect().await?;

    let ctx = RequestContext::new("math.add", json!({"a": 2, "b": 3})).targeted("beta");
    let reply = alpha.request(ctx).await?;
    let result = reply.await??;
    tracing::info!("math.add on beta returned {}", result);

    alpha.send_ping(Some("beta")).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    beta.disconnect().await?;
    alpha.disconnect().await?;
    Ok(())
}
