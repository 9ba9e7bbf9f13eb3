//! Pending-request table correlating outbound requests with responses.
//!
//! One entry per in-flight outbound call, keyed by correlation id.
//! Every entry sees exactly one terminal event: a RESPONSE completion,
//! an explicit remove (caller-owned timeout), or a peer-loss sweep.

use crate::error::{Result, TransitError};
use crate::packet::{PROTOCOL_VERSION, RequestPayload};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;
use uuid::Uuid;

/// Caller-side descriptor of an outgoing request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, unique within this node's lifetime
    pub id: String,
    /// Action name
    pub action: String,
    /// Target node; `None` when an external balancer picks the target
    pub node_id: Option<String>,
    /// Action parameters
    pub params: Value,
    /// Caller metadata propagated across hops
    pub meta: Value,
    /// Remaining caller-side timeout in milliseconds
    pub timeout: Option<u64>,
    /// Call-chain depth
    pub level: u32,
    /// Whether metrics were requested for this call
    pub metrics: bool,
    /// Id of the parent call in the chain
    pub parent_id: Option<String>,
    /// Id of the root call in the chain
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Create a context with a fresh correlation id.
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            request_id: Some(id.clone()),
            id,
            action: action.into(),
            node_id: None,
            params,
            meta: Value::Null,
            timeout: None,
            level: 1,
            metrics: false,
            parent_id: None,
        }
    }

    /// Address the request to a specific node.
    pub fn targeted(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Attach caller metadata.
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Set the remaining caller-side timeout.
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Build the wire payload for this context.
    pub fn to_payload(&self, sender: &str) -> RequestPayload {
        RequestPayload {
            ver: PROTOCOL_VERSION.to_owned(),
            sender: sender.to_owned(),
            id: self.id.clone(),
            action: self.action.clone(),
            params: self.params.clone(),
            meta: self.meta.clone(),
            timeout: self.timeout,
            level: self.level,
            metrics: self.metrics,
            parent_id: self.parent_id.clone(),
            request_id: self.request_id.clone(),
        }
    }
}

/// Completion side of a pending request.
///
/// Resolves with the remote result, or with [`TransitError`] when the
/// call fails remotely or the peer disconnects. The sender half being
/// dropped (explicit remove) surfaces as a `RecvError`.
pub type PendingReply = oneshot::Receiver<Result<Value>>;

#[derive(Debug)]
struct PendingRequest {
    action: String,
    node_id: Option<String>,
    resolve: oneshot::Sender<Result<Value>>,
}

/// Table of in-flight outbound requests keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingStore {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight request and hand back its completion.
    ///
    /// Fails with [`TransitError::QueueFull`] when the table already
    /// holds `limit` entries; a `limit` of 0 disables the cap.
    pub async fn insert(&self, ctx: &RequestContext, limit: usize) -> Result<PendingReply> {
        let mut entries = self.entries.lock().await;
        if limit > 0 && entries.len() >= limit {
            return Err(TransitError::QueueFull {
                action: ctx.action.clone(),
                node_id: ctx.node_id.clone().unwrap_or_default(),
                size: entries.len(),
                limit,
            });
        }
        let (resolve, reply) = oneshot::channel();
        entries.insert(
            ctx.id.clone(),
            PendingRequest {
                action: ctx.action.clone(),
                node_id: ctx.node_id.clone(),
                resolve,
            },
        );
        Ok(reply)
    }

    /// Drop an entry without completing it. Idempotent.
    pub async fn remove(&self, id: &str) -> bool {
        self.entries.lock().await.remove(id).is_some()
    }

    /// Resolve an entry with the remote result.
    ///
    /// Returns `false` when no entry exists (already timed out or
    /// swept); the late response is a no-op then.
    pub async fn complete_success(&self, id: &str, data: Value) -> bool {
        match self.entries.lock().await.remove(id) {
            Some(entry) => {
                if entry.resolve.send(Ok(data)).is_err() {
                    debug!("Completion receiver for request '{}' was dropped", id);
                }
                true
            }
            None => false,
        }
    }

    /// Reject an entry with a remote failure.
    pub async fn complete_failure(&self, id: &str, err: TransitError) -> bool {
        match self.entries.lock().await.remove(id) {
            Some(entry) => {
                if entry.resolve.send(Err(err)).is_err() {
                    debug!("Completion receiver for request '{}' was dropped", id);
                }
                true
            }
            None => false,
        }
    }

    /// Reject every entry targeted at a disconnected node.
    ///
    /// Returns the number of swept entries.
    pub async fn cancel_by_node(&self, node_id: &str) -> usize {
        let mut entries = self.entries.lock().await;
        let swept: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.node_id.as_deref() == Some(node_id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &swept {
            if let Some(entry) = entries.remove(id) {
                let _ = entry.resolve.send(Err(TransitError::RequestRejected {
                    action: entry.action,
                    node_id: node_id.to_owned(),
                }));
            }
        }
        swept.len()
    }

    /// Reject every entry; used when the local node leaves the mesh.
    ///
    /// Returns the number of drained entries.
    pub async fn cancel_all(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        for (_, entry) in entries.drain() {
            let _ = entry.resolve.send(Err(TransitError::RequestRejected {
                action: entry.action,
                node_id: entry.node_id.unwrap_or_default(),
            }));
        }
        count
    }

    /// Number of in-flight requests.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the table holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(action: &str, node: Option<&str>) -> RequestContext {
        let mut ctx = RequestContext::new(action, json!({}));
        ctx.node_id = node.map(str::to_owned);
        ctx
    }

    #[tokio::test]
    async fn success_resolves_and_empties_the_table() {
        let store = PendingStore::new();
        let request = ctx("math.add", Some("node-b"));
        let reply = store.insert(&request, 0).await.expect("insert");

        assert!(store.complete_success(&request.id, json!(5)).await);
        assert!(store.is_empty().await);
        let value = reply.await.expect("reply").expect("success");
        assert_eq!(value, json!(5));
    }

    #[tokio::test]
    async fn completion_fires_at_most_once() {
        let store = PendingStore::new();
        let request = ctx("math.add", Some("node-b"));
        let _reply = store.insert(&request, 0).await.expect("insert");

        assert!(store.complete_success(&request.id, json!(1)).await);
        assert!(!store.complete_success(&request.id, json!(2)).await);
        assert!(
            !store
                .complete_failure(&request.id, TransitError::MissingPayload)
                .await
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = PendingStore::new();
        let request = ctx("math.add", None);
        let _reply = store.insert(&request, 0).await.expect("insert");

        assert!(store.remove(&request.id).await);
        assert!(!store.remove(&request.id).await);
    }

    #[tokio::test]
    async fn queue_gate_reports_the_actual_size() {
        let store = PendingStore::new();
        let first = ctx("math.add", Some("node-b"));
        let second = ctx("math.sub", Some("node-b"));
        let _r1 = store.insert(&first, 2).await.expect("first");
        let _r2 = store.insert(&second, 2).await.expect("second");

        let third = ctx("math.mul", Some("node-b"));
        let err = store.insert(&third, 2).await.expect_err("gate");
        match err {
            TransitError::QueueFull {
                action,
                size,
                limit,
                ..
            } => {
                assert_eq!(action, "math.mul");
                assert_eq!(size, 2);
                assert_eq!(limit, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn zero_limit_is_unbounded() {
        let store = PendingStore::new();
        for i in 0..100 {
            let request = ctx(&format!("action.{i}"), None);
            store.insert(&request, 0).await.expect("insert");
        }
        assert_eq!(store.len().await, 100);
    }

    #[tokio::test]
    async fn cancel_all_drains_the_table() {
        let store = PendingStore::new();
        let to_b = ctx("math.add", Some("node-b"));
        let balanced = ctx("math.sub", None);
        let reply_b = store.insert(&to_b, 0).await.expect("insert");
        let reply_balanced = store.insert(&balanced, 0).await.expect("insert");

        assert_eq!(store.cancel_all().await, 2);
        assert!(store.is_empty().await);
        assert!(matches!(
            reply_b.await.expect("reply"),
            Err(TransitError::RequestRejected { .. })
        ));
        assert!(matches!(
            reply_balanced.await.expect("reply"),
            Err(TransitError::RequestRejected { .. })
        ));
    }

    #[tokio::test]
    async fn sweep_rejects_only_the_lost_node() {
        let store = PendingStore::new();
        let to_b = ctx("math.add", Some("node-b"));
        let to_c = ctx("math.add", Some("node-c"));
        let reply_b = store.insert(&to_b, 0).await.expect("insert b");
        let _reply_c = store.insert(&to_c, 0).await.expect("insert c");

        assert_eq!(store.cancel_by_node("node-b").await, 1);
        assert_eq!(store.len().await, 1);

        let err = reply_b.await.expect("reply").expect_err("rejected");
        match err {
            TransitError::RequestRejected { action, node_id } => {
                assert_eq!(action, "math.add");
                assert_eq!(node_id, "node-b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
