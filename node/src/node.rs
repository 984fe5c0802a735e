//! The beacon node: wires storage, security, the peer registry and the
//! gossip engine to a TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use beacon_network::{
    Direction, PeerInfo, PeerRegistry, PolicySource, SecurityEvent, SecurityManager,
    SecurityStats, StaticPolicySource,
};
use beacon_store::SpammerStore;
use beacon_store_lmdb::LmdbEnvironment;
use beacon_types::{Clock, PeerAddress, SpammerRecord, SystemClock};

use crate::config::NodeConfig;
use crate::context::{NodeContext, NodeSettings};
use crate::error::NodeError;
use crate::gossip::{self, GunbanOutcome, RecordOutcome};
use crate::metrics::NodeMetrics;
use crate::peer_connector::connect_to_peer;
use crate::query;
use crate::reconnect::{reconnect_loop, ReconnectPolicy};
use crate::session::run_session;
use crate::shutdown::ShutdownController;

/// Timeout for waiting on background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BeaconNode {
    config: NodeConfig,
    ctx: Arc<NodeContext>,
    shutdown: Arc<ShutdownController>,
    local_addr: Option<SocketAddr>,
    task_handles: Vec<JoinHandle<()>>,
    /// Kept open for the node's lifetime when the store is LMDB-backed.
    _environment: Option<LmdbEnvironment>,
}

impl BeaconNode {
    /// A node over LMDB in `config.data_dir`, with the `[security]` table of
    /// `config` as a fixed policy.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let source = StaticPolicySource::new(config.security.clone());
        Self::with_policy_source(config, Box::new(source))
    }

    /// A node over LMDB in `config.data_dir`, with a reloadable policy.
    pub fn with_policy_source(
        config: NodeConfig,
        source: Box<dyn PolicySource>,
    ) -> Result<Self, NodeError> {
        let environment = LmdbEnvironment::open_default(&config.data_dir)?;
        let store: Arc<dyn SpammerStore> = Arc::new(environment.spammer_store());
        let mut node = Self::with_parts(config, store, source, Arc::new(SystemClock))?;
        node._environment = Some(environment);
        Ok(node)
    }

    /// A node over caller-supplied collaborators.
    pub fn with_parts(
        config: NodeConfig,
        store: Arc<dyn SpammerStore>,
        source: Box<dyn PolicySource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NodeError> {
        let node_uuid = config
            .node_uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let security = SecurityManager::new(source, Arc::clone(&clock))?;
        let registry = PeerRegistry::new(node_uuid.clone(), config.bootstrap_peers.clone());
        let settings = NodeSettings {
            node_uuid,
            node_version: config.node_version.clone(),
            request_timeout: config.request_timeout(),
            seen_cache_capacity: config.seen_cache_capacity,
            max_frame_size: config.max_frame_size,
        };
        let ctx = NodeContext::new(
            settings,
            security,
            registry,
            config.gunban_dedup_capacity,
            store,
            clock,
            Arc::new(NodeMetrics::new()),
        );

        Ok(Self {
            config,
            ctx: Arc::new(ctx),
            shutdown: Arc::new(ShutdownController::new()),
            local_addr: None,
            task_handles: Vec::new(),
            _environment: None,
        })
    }

    // -- Lifecycle -------------------------------------------------------------

    /// Bind the listener and start the accept and reconnect tasks.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.local_addr.is_some() {
            return Ok(());
        }
        if self.shutdown.is_triggered() {
            self.shutdown = Arc::new(ShutdownController::new());
        }

        let listener =
            TcpListener::bind((self.config.listen_host.as_str(), self.config.port)).await?;
        let local = listener.local_addr()?;
        self.local_addr = Some(local);

        {
            let mut registry = self.ctx.registry.lock().await;
            registry.add_local_address(PeerAddress::from(local));
            if local.ip().is_unspecified() {
                registry.add_local_address(PeerAddress::new("127.0.0.1", local.port()));
                registry.add_local_address(PeerAddress::new("localhost", local.port()));
            }
        }

        tracing::info!(
            uuid = %self.ctx.node_uuid(),
            addr = %local,
            bootstrap_peers = self.config.bootstrap_peers.len(),
            "beacon node starting"
        );

        self.task_handles.push(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.ctx),
            Arc::clone(&self.shutdown),
        )));

        let policy = ReconnectPolicy {
            initial_delay: self.config.reconnect_initial_delay(),
            max_delay: self.config.reconnect_max_delay(),
            connect_timeout: self.config.connect_timeout(),
        };
        let signal = self.ctx.registry.lock().await.reconnect_signal();
        self.task_handles.push(tokio::spawn(reconnect_loop(
            Arc::clone(&self.ctx),
            policy,
            Arc::clone(&self.shutdown),
        )));
        if !self.config.bootstrap_peers.is_empty() {
            signal.notify_one();
        }
        Ok(())
    }

    /// Signal every task and wait for the background tasks to finish.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!(uuid = %self.ctx.node_uuid(), "beacon node stopping");
        self.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "shutdown timeout, some tasks may still be running");
        }

        self.local_addr = None;
        tracing::info!("beacon node stopped");
        Ok(())
    }

    /// Run until SIGINT or SIGTERM, then stop.
    pub async fn run_until_signal(&mut self) -> Result<(), NodeError> {
        self.start().await?;
        self.shutdown.wait_for_signal().await;
        self.stop().await
    }

    /// Dial a peer. The handshake completes asynchronously.
    pub async fn connect_to(&self, address: &PeerAddress) -> Result<(), NodeError> {
        connect_to_peer(
            Arc::clone(&self.ctx),
            address,
            self.config.connect_timeout(),
            self.shutdown.subscribe(),
        )
        .await?;
        Ok(())
    }

    // -- Request surface -------------------------------------------------------

    /// Store a locally flagged record and gossip it.
    pub async fn report_spammer(&self, record: SpammerRecord) -> Result<RecordOutcome, NodeError> {
        gossip::publish_record(&self.ctx, record).await
    }

    /// Remove `spammer_id` here and on every reachable node.
    pub async fn gunban(&self, spammer_id: &str) -> Result<GunbanOutcome, NodeError> {
        gossip::publish_gunban(&self.ctx, spammer_id).await
    }

    pub async fn check_local(&self, user_id: &str) -> Result<Option<SpammerRecord>, NodeError> {
        self.ctx.load_record(user_id).await
    }

    /// Ask every connected peer; the first positive answer wins.
    pub async fn query_peers(&self, user_id: &str) -> Result<Option<SpammerRecord>, NodeError> {
        query::query_peers(Arc::clone(&self.ctx), user_id).await
    }

    // -- Introspection ---------------------------------------------------------

    pub fn node_uuid(&self) -> &str {
        self.ctx.node_uuid()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        self.local_addr.ok_or(NodeError::NotStarted)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<NodeMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    pub fn context(&self) -> Arc<NodeContext> {
        Arc::clone(&self.ctx)
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.ctx.registry.lock().await.snapshot()
    }

    pub async fn handshaked_peer_count(&self) -> usize {
        self.ctx.registry.lock().await.handshaked_count()
    }

    pub async fn discovered_peers(&self) -> Vec<PeerAddress> {
        self.ctx.registry.lock().await.discovered().iter().cloned().collect()
    }

    // -- Security administration -----------------------------------------------

    pub async fn security_stats(&self) -> SecurityStats {
        self.ctx.security.lock().await.stats()
    }

    pub async fn security_events(&self) -> Vec<SecurityEvent> {
        self.ctx.security.lock().await.security_events()
    }

    /// Apply the policy source if its revision advanced.
    pub async fn check_security_reload(&self) -> bool {
        self.ctx.security.lock().await.check_config_reload()
    }

    /// Re-read the policy source regardless of its revision.
    pub async fn reload_security(&self) -> bool {
        self.ctx.security.lock().await.reload_configuration()
    }

    pub async fn block_node(&self, node_uuid: &str, reason: &str) {
        self.ctx.security.lock().await.add_blocked_node(node_uuid, reason);
    }

    pub async fn unblock_node(&self, node_uuid: &str) -> bool {
        self.ctx.security.lock().await.remove_blocked_node(node_uuid)
    }

    pub async fn block_ip(&self, ip: &str, reason: &str) {
        self.ctx.security.lock().await.add_blocked_ip(ip, reason);
    }

    pub async fn unblock_ip(&self, ip: &str) -> bool {
        self.ctx.security.lock().await.remove_blocked_ip(ip)
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<NodeContext>,
    shutdown: Arc<ShutdownController>,
) {
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => {
                tracing::info!("P2P listener shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!(peer = %addr, "inbound TCP connection");
                    tokio::spawn(run_session(
                        Arc::clone(&ctx),
                        stream,
                        PeerAddress::from(addr),
                        Direction::Inbound,
                        shutdown.subscribe(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_network::SecurityPolicy;
    use beacon_nullables::{NullClock, NullStore};

    fn test_config() -> NodeConfig {
        NodeConfig {
            listen_host: "127.0.0.1".into(),
            port: 0,
            node_uuid: Some("node-under-test".into()),
            ..NodeConfig::default()
        }
    }

    fn null_node(config: NodeConfig) -> BeaconNode {
        let source = StaticPolicySource::new(SecurityPolicy::default());
        BeaconNode::with_parts(
            config,
            Arc::new(NullStore::new()),
            Box::new(source),
            Arc::new(NullClock::default()),
        )
        .unwrap()
    }

    #[test]
    fn missing_uuid_is_generated() {
        let node = null_node(NodeConfig {
            node_uuid: None,
            ..test_config()
        });
        assert!(uuid::Uuid::parse_str(node.node_uuid()).is_ok());
    }

    #[tokio::test]
    async fn start_binds_an_ephemeral_port_and_stop_releases_it() {
        let mut node = null_node(test_config());
        assert!(matches!(node.local_addr(), Err(NodeError::NotStarted)));

        node.start().await.unwrap();
        let addr = node.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        node.stop().await.unwrap();
        assert!(node.local_addr().is_err());
    }

    #[tokio::test]
    async fn stopped_node_can_start_again() {
        let mut node = null_node(test_config());
        node.start().await.unwrap();
        node.stop().await.unwrap();

        node.start().await.unwrap();
        let addr = node.local_addr().unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_ok());
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn report_and_gunban_without_peers() {
        let node = null_node(test_config());
        let record = SpammerRecord::new("42");
        assert!(matches!(
            node.report_spammer(record.clone()).await.unwrap(),
            RecordOutcome::Stored(_)
        ));
        assert_eq!(node.check_local("42").await.unwrap(), Some(record));

        node.gunban("42").await.unwrap();
        assert_eq!(node.check_local("42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lmdb_backed_node_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..test_config()
        };
        {
            let node = BeaconNode::new(config.clone()).unwrap();
            node.report_spammer(SpammerRecord::new("7")).await.unwrap();
        }
        let node = BeaconNode::new(config).unwrap();
        assert!(node.check_local("7").await.unwrap().is_some());
    }
}
