//! State shared by every connection of one node.
//!
//! One [`NodeContext`] is built per node and handed to each connection and
//! background task behind an `Arc`. Locks are never held across network I/O
//! and never nested.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use beacon_network::{
    broadcast_frame, BroadcastResult, ConnectionId, MessageDedup, PeerRegistry, SecurityManager,
};
use beacon_store::SpammerStore;
use beacon_types::{Clock, SpammerRecord};

use crate::metrics::NodeMetrics;
use crate::pending::PendingRequests;
use crate::NodeError;

/// Per-node identity and limits, fixed at startup.
#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub node_uuid: String,
    pub node_version: String,
    pub request_timeout: Duration,
    pub seen_cache_capacity: usize,
    pub max_frame_size: usize,
}

pub struct NodeContext {
    pub settings: NodeSettings,
    pub security: Mutex<SecurityManager>,
    pub registry: Mutex<PeerRegistry>,
    pub pending: PendingRequests,
    /// Gunban events already applied and relayed by this node.
    pub gunban_seen: Mutex<MessageDedup>,
    pub store: Arc<dyn SpammerStore>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<NodeMetrics>,
}

impl NodeContext {
    pub fn new(
        settings: NodeSettings,
        security: SecurityManager,
        registry: PeerRegistry,
        gunban_dedup_capacity: usize,
        store: Arc<dyn SpammerStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            settings,
            security: Mutex::new(security),
            registry: Mutex::new(registry),
            pending: PendingRequests::new(),
            gunban_seen: Mutex::new(MessageDedup::new(gunban_dedup_capacity)),
            store,
            clock,
            metrics,
        }
    }

    pub fn node_uuid(&self) -> &str {
        &self.settings.node_uuid
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    // -- Outbound --------------------------------------------------------------

    /// Sign `message` as this node and encode it for the wire.
    ///
    /// A signing failure is logged and the message goes out unsigned; the
    /// receiving side decides whether to accept it.
    pub async fn seal(&self, mut message: Value) -> Result<Vec<u8>, NodeError> {
        {
            let security = self.security.lock().await;
            if let Err(e) = security.sign_message(&mut message, self.node_uuid()) {
                tracing::error!(error = %e, "failed to sign outbound message");
            }
        }
        Ok(beacon_protocol::encode(&message)?)
    }

    /// Sign once and queue `message` on every handshake-complete peer except
    /// `exclude`.
    pub async fn broadcast(
        &self,
        message: Value,
        exclude: Option<ConnectionId>,
    ) -> Result<BroadcastResult, NodeError> {
        let frame = self.seal(message).await?;
        let targets = self.registry.lock().await.handshaked_peers_except(exclude);
        Ok(broadcast_frame(&frame, &targets))
    }

    // -- Storage ---------------------------------------------------------------
    //
    // Store calls block, so they run on the blocking pool.

    pub async fn load_record(&self, user_id: &str) -> Result<Option<SpammerRecord>, NodeError> {
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || store.get(&user_id))
            .await
            .map_err(|e| NodeError::Task(e.to_string()))?
            .map_err(NodeError::from)
    }

    pub async fn save_record(&self, record: SpammerRecord) -> Result<(), NodeError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.put(&record))
            .await
            .map_err(|e| NodeError::Task(e.to_string()))?
            .map_err(NodeError::from)
    }

    pub async fn delete_record(&self, user_id: &str) -> Result<bool, NodeError> {
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || store.delete(&user_id))
            .await
            .map_err(|e| NodeError::Task(e.to_string()))?
            .map_err(NodeError::from)
    }

    /// Refresh the peer gauges from the registry.
    pub async fn update_peer_gauges(&self) {
        let registry = self.registry.lock().await;
        self.metrics.peer_count.set(registry.connected_count() as i64);
        self.metrics
            .handshaked_peer_count
            .set(registry.handshaked_count() as i64);
    }
}
