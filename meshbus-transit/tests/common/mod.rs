//! Shared test doubles: an in-memory broker delegate and registry,
//! plus helpers to stand up transit nodes over a memory hub.

#![allow(dead_code)]

use async_trait::async_trait;
use std::future::Future;
use meshbus_lib::config::{ReconnectConfig, TransitConfig};
use meshbus_lib::models::{CpuUsage, NodeInfo, ServiceInfo};
use meshbus_transit::packet::{ErrorEnvelope, EventPayload, RequestPayload};
use meshbus_transit::{
    BrokerDelegate, MemoryHub, MemoryTransporter, NodeRegistry, Transit,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Broker delegate recording every callback.
pub struct TestBroker {
    node_id: String,
    pub local_events: Mutex<Vec<(String, Value)>>,
    pub emitted_events: Mutex<Vec<EventPayload>>,
    pub handled_requests: Mutex<Vec<RequestPayload>>,
    response: Mutex<Result<Value, ErrorEnvelope>>,
    groups: Mutex<Vec<String>>,
}

impl TestBroker {
    pub fn new(node_id: &str) -> Arc<Self> {
        Arc::new(Self {
            node_id: node_id.to_owned(),
            local_events: Mutex::new(Vec::new()),
            emitted_events: Mutex::new(Vec::new()),
            handled_requests: Mutex::new(Vec::new()),
            response: Mutex::new(Ok(Value::Null)),
            groups: Mutex::new(Vec::new()),
        })
    }

    /// Set the outcome the broker reports for remote requests.
    pub async fn respond_with(&self, outcome: Result<Value, ErrorEnvelope>) {
        *self.response.lock().await = outcome;
    }

    pub async fn set_event_groups(&self, groups: Vec<String>) {
        *self.groups.lock().await = groups;
    }

    /// Last locally broadcast payload for `event`, if any.
    pub async fn local_event(&self, event: &str) -> Option<Value> {
        self.local_events
            .lock()
            .await
            .iter()
            .rev()
            .find(|(name, _)| name == event)
            .map(|(_, data)| data.clone())
    }
}

#[async_trait]
impl BrokerDelegate for TestBroker {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn broadcast_local(&self, event: &str, data: Value) {
        self.local_events
            .lock()
            .await
            .push((event.to_owned(), data));
    }

    async fn handle_remote_request(
        &self,
        request: RequestPayload,
    ) -> Result<Value, ErrorEnvelope> {
        self.handled_requests.lock().await.push(request);
        self.response.lock().await.clone()
    }

    async fn emit_local_services(&self, event: EventPayload) {
        self.emitted_events.lock().await.push(event);
    }

    async fn local_node_info(&self) -> NodeInfo {
        NodeInfo::new(format!("{}-host", self.node_id))
            .with_service(ServiceInfo::new("math").with_action("math.add"))
    }

    async fn event_groups(&self, _event: &str) -> Vec<String> {
        self.groups.lock().await.clone()
    }

    async fn cpu_usage(&self) -> CpuUsage {
        CpuUsage {
            cpu: Some(4.2),
            cpu_seq: 1,
        }
    }
}

/// Registry recording every discovery and liveness callback.
#[derive(Default)]
pub struct TestRegistry {
    pub infos: Mutex<Vec<(String, NodeInfo)>>,
    pub disconnected: Mutex<Vec<(String, bool)>>,
    pub heartbeats: Mutex<Vec<(String, CpuUsage)>>,
}

impl TestRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn knows_node(&self, node_id: &str) -> bool {
        self.infos
            .lock()
            .await
            .iter()
            .any(|(sender, _)| sender == node_id)
    }

    pub async fn heartbeat_count_from(&self, node_id: &str) -> usize {
        self.heartbeats
            .lock()
            .await
            .iter()
            .filter(|(sender, _)| sender == node_id)
            .count()
    }
}

#[async_trait]
impl NodeRegistry for TestRegistry {
    async fn process_node_info(&self, sender: &str, info: NodeInfo) {
        self.infos.lock().await.push((sender.to_owned(), info));
    }

    async fn node_disconnected(&self, node_id: &str, unexpected: bool) {
        self.disconnected
            .lock()
            .await
            .push((node_id.to_owned(), unexpected));
    }

    async fn node_heartbeat(&self, sender: &str, cpu: CpuUsage) {
        self.heartbeats.lock().await.push((sender.to_owned(), cpu));
    }
}

/// One connected node: transit plus its recording collaborators.
pub struct TestNode {
    pub broker: Arc<TestBroker>,
    pub registry: Arc<TestRegistry>,
    pub transit: Arc<Transit>,
}

/// Configuration tuned for tests: fast retries, no heartbeat task.
pub fn quick_config() -> TransitConfig {
    TransitConfig {
        max_queue_size: 0,
        heartbeat_interval_ms: 0,
        reconnect: ReconnectConfig {
            initial_delay_ms: 10,
            max_delay_ms: 40,
            multiplier: 1.0,
        },
    }
}

/// Stand up a transit node on the hub without connecting it.
pub fn build_node(hub: &Arc<MemoryHub>, node_id: &str, config: TransitConfig) -> TestNode {
    let broker = TestBroker::new(node_id);
    let registry = TestRegistry::new();
    let transporter = Arc::new(MemoryTransporter::new(node_id, Arc::clone(hub)));
    let transit = Transit::new(
        config,
        Arc::clone(&broker) as Arc<dyn BrokerDelegate>,
        Arc::clone(&registry) as Arc<dyn NodeRegistry>,
        transporter,
    );
    TestNode {
        broker,
        registry,
        transit,
    }
}

/// Stand up a connected transit node on the hub.
pub async fn spawn_node(hub: &Arc<MemoryHub>, node_id: &str, config: TransitConfig) -> TestNode {
    let node = build_node(hub, node_id, config);
    node.transit.connect().await.expect("node should connect");
    node
}

/// Await a condition, polling every few milliseconds.
pub async fn wait_until<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if probe().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
