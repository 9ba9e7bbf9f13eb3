//! The Transit engine: lifecycle, inbound dispatch, outbound API and
//! liveness.
//!
//! One `Transit` instance ties the embedding broker to a transporter.
//! Outbound calls may originate from any task; the inbound pump is a
//! single background task draining the transporter's frame channel.
//! The pending-request table and the packet counters are the only
//! shared mutable state.

use meshbus_lib::config::TransitConfig;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::TransitStats;
use crate::broker::{BrokerDelegate, NodeRegistry};
use crate::error::{Result, TransitError};
use crate::packet::{
    DisconnectPayload, DiscoverPayload, ErrorEnvelope, EventPayload, HeartbeatPayload, InfoPayload,
    PROTOCOL_VERSION, Packet, PacketPayload, PacketType, PingPayload, PongPayload, RequestPayload,
    ResponsePayload,
};
use crate::pending::{PendingReply, PendingStore, RequestContext};
use crate::serializer::{JsonSerializer, PacketSerializer};
use crate::topic::core_subscriptions;
use crate::transporter::{InboundFrame, Transporter};

/// Grace period absorbing INFO replies before a connect resolves.
const HANDSHAKE_GRACE: Duration = Duration::from_millis(200);

/// Milliseconds since the Unix epoch.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Round-trip time and estimated clock offset from a PONG.
///
/// `time` is our clock at PING send, `arrived` the responder's clock at
/// receipt, `now` our clock at PONG receipt. The offset estimate
/// assumes symmetric latency.
fn pong_metrics(now: i64, time: i64, arrived: i64) -> (i64, i64) {
    let elapsed = now - time;
    let offset = ((now - arrived) as f64 - elapsed as f64 / 2.0).round() as i64;
    (elapsed, offset)
}

/// The wire-facing transit layer of one mesh node.
pub struct Transit {
    node_id: String,
    config: TransitConfig,
    broker: Arc<dyn BrokerDelegate>,
    registry: Arc<dyn NodeRegistry>,
    transporter: Arc<dyn Transporter>,
    serializer: Arc<dyn PacketSerializer>,
    pending: PendingStore,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    connected: AtomicBool,
    disconnecting: AtomicBool,
    subscribed: AtomicBool,
    heartbeat_running: AtomicBool,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    shutdown_tx: broadcast::Sender<()>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
}

impl Transit {
    /// Create a transit over a transporter, using the JSON serializer.
    pub fn new(
        config: TransitConfig,
        broker: Arc<dyn BrokerDelegate>,
        registry: Arc<dyn NodeRegistry>,
        transporter: Arc<dyn Transporter>,
    ) -> Arc<Self> {
        Self::with_serializer(config, broker, registry, transporter, Arc::new(JsonSerializer))
    }

    /// Create a transit with a custom payload serializer.
    pub fn with_serializer(
        config: TransitConfig,
        broker: Arc<dyn BrokerDelegate>,
        registry: Arc<dyn NodeRegistry>,
        transporter: Arc<dyn Transporter>,
        serializer: Arc<dyn PacketSerializer>,
    ) -> Arc<Self> {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        transporter.bind(incoming_tx);

        let (ready_tx, ready_rx) = watch::channel(false);
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            node_id: broker.node_id().to_owned(),
            config,
            broker,
            registry,
            transporter,
            serializer,
            pending: PendingStore::new(),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            heartbeat_running: AtomicBool::new(false),
            ready_tx,
            ready_rx,
            shutdown_tx,
            inbound_rx: Mutex::new(Some(incoming_rx)),
        })
    }

    /// The local node id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether the post-connect handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of the packet counters.
    pub fn stats(&self) -> TransitStats {
        TransitStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
        }
    }

    /// Number of in-flight outbound requests.
    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Connect the transporter and run the post-connect handshake.
    ///
    /// Transporter failures are retried with the configured backoff;
    /// a concurrent [`disconnect`](Self::disconnect) stops the retry
    /// loop. Resolves only once the handshake reports connected.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        info!("Connecting to the transporter...");
        self.disconnecting.store(false, Ordering::SeqCst);

        let mut delay = self.config.reconnect.initial_delay();
        loop {
            match self.transporter.connect().await {
                Ok(()) => break,
                Err(e) => {
                    if self.disconnecting.load(Ordering::SeqCst) {
                        return Err(e);
                    }
                    warn!("Connection failed: {}. Retrying in {:?}...", e, delay);
                    tokio::time::sleep(delay).await;
                    if self.disconnecting.load(Ordering::SeqCst) {
                        return Err(e);
                    }
                    delay = self.config.reconnect.next_delay(delay);
                    info!("Reconnecting to the transporter...");
                }
            }
        }

        self.start_inbound_pump().await;
        let reconnect = self.subscribed.load(Ordering::SeqCst);
        self.handshake(reconnect).await
    }

    /// Post-connect handshake, entered on initial connect and on every
    /// reconnect.
    ///
    /// Binds the core topics (first connect only), probes the mesh,
    /// advertises the local descriptor, then waits a short grace
    /// period for INFO replies before declaring the node connected.
    /// Public so that self-reconnecting transporter adapters can
    /// re-enter it with `reconnect = true`.
    pub async fn handshake(self: &Arc<Self>, reconnect: bool) -> Result<()> {
        if !reconnect {
            self.make_subscriptions().await?;
        }
        self.discover_nodes().await?;
        self.send_node_info(None).await?;
        tokio::time::sleep(HANDSHAKE_GRACE).await;

        self.connected.store(true, Ordering::SeqCst);
        info!("Transit of node '{}' is connected", self.node_id);
        self.broker
            .broadcast_local("$transporter.connected", Value::Null)
            .await;
        self.start_heartbeat_task();
        Ok(())
    }

    /// Bind the core topic set; publishes issued meanwhile are held
    /// behind this barrier. A peer answering our DISCOVER before the
    /// INFO topic is live would otherwise go unheard.
    async fn make_subscriptions(&self) -> Result<()> {
        let topics = core_subscriptions(&self.node_id);
        let subscriptions = topics.iter().map(|t| self.transporter.subscribe(t));
        futures::future::try_join_all(subscriptions).await?;

        self.subscribed.store(true, Ordering::SeqCst);
        let _ = self.ready_tx.send(true);
        debug!("Core topic subscriptions of node '{}' are live", self.node_id);
        Ok(())
    }

    /// Gracefully leave the mesh.
    ///
    /// Notifies local listeners, tells peers via a DISCONNECT packet,
    /// and closes the transporter. Sets the `disconnecting` flag so a
    /// concurrent connect loop stops retrying.
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from the transporter...");
        self.connected.store(false, Ordering::SeqCst);
        self.disconnecting.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        self.broker
            .broadcast_local("$transporter.disconnected", json!({ "graceFul": true }))
            .await;

        if self.transporter.is_connected() {
            // without live subscriptions no peer heard of us; sending
            // the notice would block on the barrier
            if *self.ready_rx.borrow() {
                self.send_disconnect_packet().await?;
            }
            self.transporter.disconnect().await?;
        }

        let swept = self.pending.cancel_all().await;
        if swept > 0 {
            debug!("Rejected {} pending requests on disconnect", swept);
        }
        Ok(())
    }

    /// Spawn the task draining inbound frames into the dispatcher.
    /// Runs for the lifetime of the transporter binding.
    async fn start_inbound_pump(self: &Arc<Self>) {
        let Some(mut incoming) = self.inbound_rx.lock().await.take() else {
            return;
        };
        let transit = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = incoming.recv().await {
                transit.on_message(frame.kind, &frame.data).await;
            }
            debug!("Inbound frame channel closed");
        });
    }

    /// Spawn the periodic HEARTBEAT task; stopped by `disconnect`.
    fn start_heartbeat_task(self: &Arc<Self>) {
        let interval = self.config.heartbeat_interval();
        if interval.is_zero() {
            return;
        }
        if self.heartbeat_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let transit = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick fires immediately; INFO just went out
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = transit.send_heartbeat().await {
                            warn!("Unable to send HEARTBEAT packet: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            transit.heartbeat_running.store(false, Ordering::SeqCst);
            debug!("Heartbeat task of node '{}' stopped", transit.node_id);
        });
    }

    // ---------------------------------------------------------------
    // Inbound dispatcher
    // ---------------------------------------------------------------

    /// Single entry point for inbound packets.
    ///
    /// Malformed, stale-versioned or self-echoed packets are logged
    /// and dropped; handler failures never escape. A misbehaving peer
    /// must not take the connection down.
    pub async fn on_message(&self, kind: PacketType, data: &[u8]) {
        if data.is_empty() {
            warn!("{}: {} packet", TransitError::MissingPacket, kind);
            return;
        }

        let payload = match self.serializer.deserialize(kind, data) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Unable to decode {} packet: {}", kind, e);
                return;
            }
        };

        self.packets_received.fetch_add(1, Ordering::Relaxed);

        if payload.ver() != PROTOCOL_VERSION {
            let mismatch = TransitError::ProtocolVersionMismatch {
                sender: payload.sender().to_owned(),
                local: PROTOCOL_VERSION.to_owned(),
                remote: payload.ver().to_owned(),
            };
            error!("{}", mismatch);
            return;
        }

        // Our own discovery/liveness echoes are worthless; EVENT,
        // REQUEST and RESPONSE may legitimately loop back through an
        // external balancer.
        if payload.sender() == self.node_id
            && !matches!(
                kind,
                PacketType::Event | PacketType::Request | PacketType::Response
            )
        {
            return;
        }

        if let Err(e) = self.dispatch(payload).await {
            error!("Unable to handle {} packet: {}", kind, e);
        }
    }

    async fn dispatch(&self, payload: PacketPayload) -> Result<()> {
        match payload {
            PacketPayload::Event(payload) => self.handle_event(payload).await,
            PacketPayload::Request(payload) => self.handle_request(payload).await,
            PacketPayload::Response(payload) => self.handle_response(payload).await,
            PacketPayload::Discover(payload) => self.send_node_info(Some(&payload.sender)).await,
            PacketPayload::Info(payload) => {
                self.registry
                    .process_node_info(&payload.sender, payload.info)
                    .await;
                Ok(())
            }
            PacketPayload::Disconnect(payload) => self.handle_disconnect(payload).await,
            PacketPayload::Heartbeat(payload) => {
                self.registry
                    .node_heartbeat(&payload.sender, payload.cpu)
                    .await;
                Ok(())
            }
            PacketPayload::Ping(payload) => self.send_pong(&payload).await,
            PacketPayload::Pong(payload) => self.handle_pong(payload).await,
        }
    }

    async fn handle_event(&self, payload: EventPayload) -> Result<()> {
        debug!(
            "Event '{}' received from node '{}'",
            payload.event, payload.sender
        );
        self.broker.emit_local_services(payload).await;
        Ok(())
    }

    /// Run a remote request against local services and send the
    /// RESPONSE back to the requester.
    async fn handle_request(&self, payload: RequestPayload) -> Result<()> {
        debug!(
            "Request '{}' received from node '{}'",
            payload.action, payload.sender
        );
        let sender = payload.sender.clone();
        let id = payload.id.clone();
        match self.broker.handle_remote_request(payload).await {
            Ok(data) => self.send_response(&sender, &id, Some(data), None).await,
            Err(envelope) => self.send_response(&sender, &id, None, Some(envelope)).await,
        }
    }

    /// Complete the pending request correlated with a RESPONSE.
    /// Responses for unknown ids (timed out or swept) are dropped.
    async fn handle_response(&self, payload: ResponsePayload) -> Result<()> {
        let completed = if payload.success {
            self.pending
                .complete_success(&payload.id, payload.data.unwrap_or(Value::Null))
                .await
        } else {
            let envelope = payload
                .error
                .unwrap_or_else(|| ErrorEnvelope::unknown(&payload.sender));
            self.pending
                .complete_failure(&payload.id, TransitError::remote(envelope, &payload.sender))
                .await
        };

        if !completed {
            debug!(
                "Orphan response received from node '{}' (id: {})",
                payload.sender, payload.id
            );
        }
        Ok(())
    }

    /// A peer left gracefully: update the registry and reject every
    /// pending request targeted at it.
    async fn handle_disconnect(&self, payload: DisconnectPayload) -> Result<()> {
        debug!("Node '{}' disconnected", payload.sender);
        self.registry.node_disconnected(&payload.sender, false).await;

        let swept = self.pending.cancel_by_node(&payload.sender).await;
        if swept > 0 {
            debug!(
                "Rejected {} pending requests targeted at node '{}'",
                swept, payload.sender
            );
        }
        Ok(())
    }

    /// Compute round-trip and clock offset from a PONG and notify
    /// local listeners.
    async fn handle_pong(&self, payload: PongPayload) -> Result<()> {
        let (elapsed, offset) = pong_metrics(now_millis(), payload.time, payload.arrived);
        self.broker
            .broadcast_local(
                "$node.pong",
                json!({
                    "nodeID": payload.sender,
                    "elapsedTime": elapsed,
                    "timeDiff": offset,
                }),
            )
            .await;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Outbound API
    // ---------------------------------------------------------------

    /// Publish a packet.
    ///
    /// Held behind the subscription barrier until the core topics are
    /// live; afterwards publishes proceed unconditionally.
    async fn publish(&self, packet: Packet) -> Result<()> {
        let mut ready = self.ready_rx.clone();
        ready
            .wait_for(|live| *live)
            .await
            .map_err(|_| TransitError::NotReady)?;

        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.transporter.prepublish(packet).await
    }

    /// Send a request to a remote node.
    ///
    /// Registers the pending entry before publishing and returns its
    /// completion; the RESPONSE handler resolves it. Request timeouts
    /// are owned by the broker, which cancels via
    /// [`remove_pending_request`](Self::remove_pending_request).
    pub async fn request(&self, ctx: RequestContext) -> Result<PendingReply> {
        let reply = self
            .pending
            .insert(&ctx, self.config.max_queue_size)
            .await?;

        let payload = ctx.to_payload(&self.node_id);
        debug!(
            "Send '{}' request to node '{}'",
            ctx.action,
            ctx.node_id.as_deref().unwrap_or("<balanced>")
        );
        let publish = self
            .publish(Packet::new(
                ctx.node_id.clone(),
                PacketPayload::Request(payload),
            ))
            .await;
        if let Err(e) = publish {
            self.pending.remove(&ctx.id).await;
            return Err(e);
        }
        Ok(reply)
    }

    /// Drop a pending request without completing it (caller-owned
    /// timeout or cancellation).
    pub async fn remove_pending_request(&self, id: &str) {
        self.pending.remove(id).await;
    }

    /// Publish the RESPONSE for a handled remote request.
    pub async fn send_response(
        &self,
        node_id: &str,
        id: &str,
        data: Option<Value>,
        error: Option<ErrorEnvelope>,
    ) -> Result<()> {
        let payload = ResponsePayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: self.node_id.clone(),
            id: id.to_owned(),
            success: error.is_none(),
            data,
            error,
        };
        self.publish(Packet::new(
            Some(node_id.to_owned()),
            PacketPayload::Response(payload),
        ))
        .await
    }

    /// Send an event to a single node.
    pub async fn send_event(&self, node_id: &str, event: &str, data: Value) -> Result<()> {
        let payload = EventPayload::new(&self.node_id, event, data, None);
        self.publish(Packet::new(
            Some(node_id.to_owned()),
            PacketPayload::Event(payload),
        ))
        .await
    }

    /// Send a balanced event: one unicast per `(node, groups)` pair,
    /// each carrying the groups the receiving node filters on.
    pub async fn send_balanced_event(
        &self,
        event: &str,
        data: Value,
        node_groups: &HashMap<String, Vec<String>>,
    ) -> Result<()> {
        for (node_id, groups) in node_groups {
            let payload =
                EventPayload::new(&self.node_id, event, data.clone(), Some(groups.clone()));
            self.publish(Packet::new(
                Some(node_id.clone()),
                PacketPayload::Event(payload),
            ))
            .await?;
        }
        Ok(())
    }

    /// Broadcast an event to every node in the named groups.
    ///
    /// Falls back to the broker's group list for the event when the
    /// caller names none; a no-op when both are empty.
    pub async fn send_event_to_groups(
        &self,
        event: &str,
        data: Value,
        groups: Vec<String>,
    ) -> Result<()> {
        let groups = if groups.is_empty() {
            self.broker.event_groups(event).await
        } else {
            groups
        };
        if groups.is_empty() {
            return Ok(());
        }

        let payload = EventPayload::new(&self.node_id, event, data, Some(groups));
        self.publish(Packet::new(None, PacketPayload::Event(payload)))
            .await
    }

    /// Probe the whole mesh for peers.
    pub async fn discover_nodes(&self) -> Result<()> {
        let payload = DiscoverPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: self.node_id.clone(),
        };
        self.publish(Packet::new(None, PacketPayload::Discover(payload)))
            .await
    }

    /// Probe one node, e.g. after its heartbeat arrived before its INFO.
    pub async fn discover_node(&self, node_id: &str) -> Result<()> {
        let payload = DiscoverPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: self.node_id.clone(),
        };
        self.publish(Packet::new(
            Some(node_id.to_owned()),
            PacketPayload::Discover(payload),
        ))
        .await
    }

    /// Publish the local node descriptor, targeted or broadcast.
    ///
    /// The broadcast form first binds service-specific topics so that
    /// peers never learn about topics that are not live yet.
    pub async fn send_node_info(&self, node_id: Option<&str>) -> Result<()> {
        if node_id.is_none() {
            self.transporter.make_service_specific_subscriptions().await?;
        }

        let info = self.broker.local_node_info().await;
        let payload = InfoPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: self.node_id.clone(),
            info,
        };
        self.publish(Packet::new(
            node_id.map(str::to_owned),
            PacketPayload::Info(payload),
        ))
        .await
    }

    /// Send a PING stamped with the local clock, targeted or broadcast.
    pub async fn send_ping(&self, node_id: Option<&str>) -> Result<()> {
        let payload = PingPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: self.node_id.clone(),
            time: now_millis(),
        };
        self.publish(Packet::new(
            node_id.map(str::to_owned),
            PacketPayload::Ping(payload),
        ))
        .await
    }

    /// Answer a PING: echo its send time and stamp the receipt clock.
    async fn send_pong(&self, ping: &PingPayload) -> Result<()> {
        let payload = PongPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: self.node_id.clone(),
            time: ping.time,
            arrived: now_millis(),
        };
        self.publish(Packet::new(
            Some(ping.sender.clone()),
            PacketPayload::Pong(payload),
        ))
        .await
    }

    /// Broadcast a HEARTBEAT carrying the current CPU load.
    pub async fn send_heartbeat(&self) -> Result<()> {
        let cpu = self.broker.cpu_usage().await;
        let payload = HeartbeatPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: self.node_id.clone(),
            cpu,
        };
        self.publish(Packet::new(None, PacketPayload::Heartbeat(payload)))
            .await
    }

    /// Broadcast the graceful departure notice.
    pub async fn send_disconnect_packet(&self) -> Result<()> {
        let payload = DisconnectPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: self.node_id.clone(),
        };
        self.publish(Packet::new(None, PacketPayload::Disconnect(payload)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_metrics_estimates_offset_with_symmetric_latency() {
        // sent at 1000, responder stamped 1040, received at 1100
        let (elapsed, offset) = pong_metrics(1100, 1000, 1040);
        assert_eq!(elapsed, 100);
        assert_eq!(offset, 10);
    }

    #[test]
    fn pong_metrics_handles_a_peer_clock_running_behind() {
        let (elapsed, offset) = pong_metrics(2000, 1900, 1700);
        assert_eq!(elapsed, 100);
        assert_eq!(offset, 250);
    }

    #[test]
    fn pong_metrics_rounds_half_millis() {
        // odd round trip: offset lands on .5 and rounds away from zero
        let (elapsed, offset) = pong_metrics(1101, 1000, 1040);
        assert_eq!(elapsed, 101);
        assert_eq!(offset, 11);
    }

    #[test]
    fn now_millis_is_past_the_epoch() {
        assert!(now_millis() > 0);
    }
}
