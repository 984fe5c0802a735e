//! Helpers shared by the multi-node tests: nodes on ephemeral localhost
//! ports over in-memory stores, and a raw JSON client for speaking the wire
//! protocol by hand.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use beacon_network::{SecurityEventKind, SecurityPolicy, StaticPolicySource};
use beacon_node::{BeaconNode, NodeConfig};
use beacon_nullables::NullStore;
use beacon_protocol::JsonStreamDecoder;
use beacon_types::{PeerAddress, SpammerRecord, SystemClock};

pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestPeer {
    pub node: BeaconNode,
    pub store: Arc<NullStore>,
    pub policy: Arc<StaticPolicySource>,
}

impl TestPeer {
    pub fn addr(&self) -> SocketAddr {
        self.node.local_addr().unwrap()
    }

    pub fn peer_address(&self) -> PeerAddress {
        PeerAddress::from(self.addr())
    }

    pub async fn connect_to(&self, other: &TestPeer) {
        self.node.connect_to(&other.peer_address()).await.unwrap();
    }

    pub async fn event_details(&self, kind: SecurityEventKind) -> Vec<String> {
        self.node
            .security_events()
            .await
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.details)
            .collect()
    }
}

pub fn config(uuid: &str) -> NodeConfig {
    NodeConfig {
        listen_host: "127.0.0.1".into(),
        port: 0,
        node_uuid: Some(uuid.to_string()),
        request_timeout_secs: 2,
        connect_timeout_secs: 2,
        ..NodeConfig::default()
    }
}

pub async fn spawn_node(uuid: &str, policy: SecurityPolicy) -> TestPeer {
    spawn_with(config(uuid), policy, Vec::new()).await
}

pub async fn spawn_with(
    config: NodeConfig,
    policy: SecurityPolicy,
    records: Vec<SpammerRecord>,
) -> TestPeer {
    let store = Arc::new(NullStore::with_records(records));
    let source = Arc::new(StaticPolicySource::new(policy));
    let mut node = BeaconNode::with_parts(
        config,
        store.clone(),
        Box::new(source.clone()),
        Arc::new(SystemClock),
    )
    .unwrap();
    node.start().await.unwrap();
    TestPeer {
        node,
        store,
        policy: source,
    }
}

/// Poll `check` until it holds, failing the test after [`WAIT`].
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn handshaked(peer: &TestPeer, count: usize) -> bool {
    peer.node.handshaked_peer_count().await == count
}

// ---------------------------------------------------------------------------
// Raw wire client
// ---------------------------------------------------------------------------

pub struct RawClient {
    stream: TcpStream,
    decoder: JsonStreamDecoder,
}

impl RawClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            decoder: JsonStreamDecoder::new(beacon_protocol::MAX_MESSAGE_SIZE),
        }
    }

    pub async fn send(&mut self, message: &Value) {
        let frame = serde_json::to_vec(message).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    /// The next message, or `None` once the node closes the connection.
    pub async fn recv(&mut self) -> Option<Value> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(item) = self.decoder.next_message() {
                return Some(item.unwrap());
            }
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("node went silent")
                .ok()?;
            if n == 0 {
                return None;
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    /// Read until the node closes the connection, returning what it sent.
    pub async fn drain_until_closed(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Some(message) = self.recv().await {
            messages.push(message);
        }
        messages
    }
}
