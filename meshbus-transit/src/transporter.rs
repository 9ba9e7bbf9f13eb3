//! Transporter seam and the in-process memory transporter.
//!
//! A transporter is an abstract pub/sub adapter: it binds an inbound
//! frame channel, subscribes to exact topic names, and serializes +
//! sends packets. Concrete network adapters (NATS, MQTT, TCP) live
//! outside this crate; [`MemoryTransporter`] routes frames between
//! nodes of the same process and backs the integration suites.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

use crate::error::{Result, TransitError};
use crate::packet::{Packet, PacketType};
use crate::serializer::{JsonSerializer, PacketSerializer};
use crate::topic::Topic;

/// A raw inbound frame: command tag plus serialized payload bytes.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Command parsed from the topic
    pub kind: PacketType,
    /// Serialized payload
    pub data: Vec<u8>,
}

/// Abstract pub/sub adapter driven by the transit layer.
///
/// Implementations must be safe for concurrent `prepublish` calls;
/// `connect`/`disconnect`/`subscribe` are sequenced by the lifecycle
/// controller.
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Bind the channel inbound frames are delivered on.
    ///
    /// Called once, before `connect`.
    fn bind(&self, incoming: mpsc::UnboundedSender<InboundFrame>);

    /// Establish the underlying connection.
    async fn connect(&self) -> Result<()>;

    /// Tear the underlying connection down.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the underlying connection is up.
    fn is_connected(&self) -> bool;

    /// Start receiving frames published on `topic`.
    async fn subscribe(&self, topic: &Topic) -> Result<()>;

    /// Serialize and send one packet.
    async fn prepublish(&self, packet: Packet) -> Result<()>;

    /// Bind service-specific topics; invoked once before the local
    /// INFO broadcast so peers never learn about topics that are not
    /// live yet.
    async fn make_service_specific_subscriptions(&self) -> Result<()>;
}

struct HubEndpoint {
    node_id: String,
    sender: mpsc::UnboundedSender<InboundFrame>,
}

/// In-process hub connecting [`MemoryTransporter`] nodes by exact
/// topic name.
#[derive(Default)]
pub struct MemoryHub {
    subscriptions: Mutex<HashMap<String, Vec<HubEndpoint>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn subscribe(
        &self,
        topic: String,
        node_id: String,
        sender: mpsc::UnboundedSender<InboundFrame>,
    ) {
        let mut subscriptions = self.subscriptions.lock().await;
        let endpoints = subscriptions.entry(topic).or_default();
        // re-subscribing replaces the previous binding
        endpoints.retain(|ep| ep.node_id != node_id);
        endpoints.push(HubEndpoint { node_id, sender });
    }

    async fn unsubscribe_node(&self, node_id: &str) {
        let mut subscriptions = self.subscriptions.lock().await;
        for endpoints in subscriptions.values_mut() {
            endpoints.retain(|ep| ep.node_id != node_id);
        }
        subscriptions.retain(|_, endpoints| !endpoints.is_empty());
    }

    /// Deliver a frame to every endpoint bound to `topic`, pruning
    /// endpoints whose receiver is gone.
    pub async fn publish(&self, topic: &str, kind: PacketType, data: Vec<u8>) {
        let mut subscriptions = self.subscriptions.lock().await;
        match subscriptions.get_mut(topic) {
            Some(endpoints) => {
                endpoints.retain(|ep| {
                    ep.sender
                        .send(InboundFrame {
                            kind,
                            data: data.clone(),
                        })
                        .is_ok()
                });
                trace!("Delivered {} frame to topic '{}'", kind, topic);
            }
            None => debug!("No subscribers for topic '{}'", topic),
        }
    }
}

/// In-process [`Transporter`] routing through a shared [`MemoryHub`].
pub struct MemoryTransporter {
    node_id: String,
    hub: Arc<MemoryHub>,
    serializer: Arc<dyn PacketSerializer>,
    connected: AtomicBool,
    incoming: std::sync::Mutex<Option<mpsc::UnboundedSender<InboundFrame>>>,
}

impl MemoryTransporter {
    pub fn new(node_id: impl Into<String>, hub: Arc<MemoryHub>) -> Self {
        Self::with_serializer(node_id, hub, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        node_id: impl Into<String>,
        hub: Arc<MemoryHub>,
        serializer: Arc<dyn PacketSerializer>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            hub,
            serializer,
            connected: AtomicBool::new(false),
            incoming: std::sync::Mutex::new(None),
        }
    }

    fn incoming_sender(&self) -> Result<mpsc::UnboundedSender<InboundFrame>> {
        self.incoming
            .lock()
            .map_err(|_| TransitError::transporter("inbound binding poisoned"))?
            .clone()
            .ok_or_else(|| TransitError::transporter("transporter is not bound"))
    }
}

#[async_trait]
impl Transporter for MemoryTransporter {
    fn bind(&self, incoming: mpsc::UnboundedSender<InboundFrame>) {
        if let Ok(mut slot) = self.incoming.lock() {
            *slot = Some(incoming);
        }
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("Memory transporter for '{}' connected", self.node_id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.hub.unsubscribe_node(&self.node_id).await;
        debug!("Memory transporter for '{}' disconnected", self.node_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, topic: &Topic) -> Result<()> {
        let sender = self.incoming_sender()?;
        self.hub
            .subscribe(topic.to_string(), self.node_id.clone(), sender)
            .await;
        Ok(())
    }

    async fn prepublish(&self, packet: Packet) -> Result<()> {
        if !self.is_connected() {
            return Err(TransitError::transporter("transporter is not connected"));
        }
        let data = self.serializer.serialize(&packet.payload)?;
        let topic = packet.topic().to_string();
        self.hub.publish(&topic, packet.kind(), data).await;
        Ok(())
    }

    async fn make_service_specific_subscriptions(&self) -> Result<()> {
        // the memory hub routes by the core topic set only
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DiscoverPayload, PROTOCOL_VERSION, PacketPayload, PingPayload};

    fn discover(sender: &str) -> PacketPayload {
        PacketPayload::Discover(DiscoverPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: sender.to_owned(),
        })
    }

    async fn bound_transporter(
        node_id: &str,
        hub: &Arc<MemoryHub>,
    ) -> (MemoryTransporter, mpsc::UnboundedReceiver<InboundFrame>) {
        let transporter = MemoryTransporter::new(node_id, Arc::clone(hub));
        let (tx, rx) = mpsc::unbounded_channel();
        transporter.bind(tx);
        transporter.connect().await.expect("connect");
        (transporter, rx)
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let hub = MemoryHub::new();
        let (alpha, mut alpha_rx) = bound_transporter("alpha", &hub).await;
        let (beta, mut beta_rx) = bound_transporter("beta", &hub).await;

        let topic = Topic::broadcast(PacketType::Discover);
        alpha.subscribe(&topic).await.expect("subscribe");
        beta.subscribe(&topic).await.expect("subscribe");

        alpha
            .prepublish(Packet::new(None, discover("alpha")))
            .await
            .expect("publish");

        assert_eq!(alpha_rx.recv().await.expect("frame").kind, PacketType::Discover);
        assert_eq!(beta_rx.recv().await.expect("frame").kind, PacketType::Discover);
    }

    #[tokio::test]
    async fn targeted_frames_reach_only_the_named_node() {
        let hub = MemoryHub::new();
        let (alpha, mut alpha_rx) = bound_transporter("alpha", &hub).await;
        let (beta, mut beta_rx) = bound_transporter("beta", &hub).await;

        alpha
            .subscribe(&Topic::targeted(PacketType::Ping, "alpha"))
            .await
            .expect("subscribe");
        beta.subscribe(&Topic::targeted(PacketType::Ping, "beta"))
            .await
            .expect("subscribe");

        let ping = PacketPayload::Ping(PingPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: "alpha".to_owned(),
            time: 1000,
        });
        alpha
            .prepublish(Packet::new(Some("beta".to_owned()), ping))
            .await
            .expect("publish");

        assert_eq!(beta_rx.recv().await.expect("frame").kind, PacketType::Ping);
        assert!(alpha_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_requires_a_connection() {
        let hub = MemoryHub::new();
        let transporter = MemoryTransporter::new("alpha", hub);
        let err = transporter
            .prepublish(Packet::new(None, discover("alpha")))
            .await
            .expect_err("not connected");
        assert!(matches!(err, TransitError::Transporter(_)));
    }

    #[tokio::test]
    async fn subscribe_requires_a_binding() {
        let hub = MemoryHub::new();
        let transporter = MemoryTransporter::new("alpha", hub);
        let err = transporter
            .subscribe(&Topic::broadcast(PacketType::Info))
            .await
            .expect_err("not bound");
        assert!(matches!(err, TransitError::Transporter(_)));
    }

    #[tokio::test]
    async fn disconnect_drops_subscriptions() {
        let hub = MemoryHub::new();
        let (alpha, mut alpha_rx) = bound_transporter("alpha", &hub).await;
        let (beta, _beta_rx) = bound_transporter("beta", &hub).await;

        let topic = Topic::broadcast(PacketType::Discover);
        alpha.subscribe(&topic).await.expect("subscribe");

        alpha.disconnect().await.expect("disconnect");
        beta.prepublish(Packet::new(None, discover("beta")))
            .await
            .expect("publish");

        assert!(alpha_rx.try_recv().is_err());
    }
}
