//! Live peer connections, known node UUIDs and discovered addresses.
//!
//! The registry performs no I/O. It holds each connection's outbound queue so
//! [`crate::broadcast_frame`] can fan messages out, and it signals the
//! reconnect task when the last peer goes away.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use beacon_types::PeerAddress;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};

/// Upper bound on addresses learned through peer-list gossip.
pub const MAX_DISCOVERED_PEERS: usize = 1024;

/// Process-unique identifier of one physical connection.
pub type ConnectionId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One registered connection.
#[derive(Clone, Debug)]
pub struct PeerEntry {
    pub id: ConnectionId,
    pub address: PeerAddress,
    pub direction: Direction,
    /// Set once the handshake completed.
    pub node_uuid: Option<String>,
    pub outbound: mpsc::Sender<Vec<u8>>,
}

impl PeerEntry {
    pub fn new(
        id: ConnectionId,
        address: PeerAddress,
        direction: Direction,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            id,
            address,
            direction,
            node_uuid: None,
            outbound,
        }
    }

    pub fn handshake_complete(&self) -> bool {
        self.node_uuid.is_some()
    }
}

/// Serializable view of a registered connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub id: ConnectionId,
    pub address: PeerAddress,
    pub direction: Direction,
    pub node_uuid: Option<String>,
}

/// Outcome of binding a node UUID to a connection after its handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UuidClaim {
    Claimed,
    /// The UUID is our own.
    SelfConnection,
    /// Another live connection already holds the UUID; it wins.
    Duplicate,
    /// The connection is not registered (already closed).
    NotRegistered,
}

pub struct PeerRegistry {
    local_uuid: String,
    next_id: ConnectionId,
    peers: BTreeMap<ConnectionId, PeerEntry>,
    /// Node UUID -> the connection that owns it.
    uuids: HashMap<String, ConnectionId>,
    /// Every UUID that ever completed a handshake with us.
    known_uuids: BTreeSet<String>,
    bootstrap: Vec<PeerAddress>,
    discovered: BTreeSet<PeerAddress>,
    local_addresses: BTreeSet<PeerAddress>,
    reconnect: Arc<Notify>,
}

impl PeerRegistry {
    pub fn new(local_uuid: impl Into<String>, bootstrap: Vec<PeerAddress>) -> Self {
        Self {
            local_uuid: local_uuid.into(),
            next_id: 1,
            peers: BTreeMap::new(),
            uuids: HashMap::new(),
            known_uuids: BTreeSet::new(),
            bootstrap,
            discovered: BTreeSet::new(),
            local_addresses: BTreeSet::new(),
            reconnect: Arc::new(Notify::new()),
        }
    }

    pub fn local_uuid(&self) -> &str {
        &self.local_uuid
    }

    /// Addresses that reach this node. Never dialled or stored as discovered.
    pub fn add_local_address(&mut self, address: PeerAddress) {
        self.discovered.remove(&address);
        self.local_addresses.insert(address);
    }

    pub fn allocate_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // -- Membership ------------------------------------------------------------

    /// Add a connection. Returns `false` if the id is already registered.
    pub fn register(&mut self, entry: PeerEntry) -> bool {
        if self.peers.contains_key(&entry.id) {
            return false;
        }
        tracing::debug!(
            id = entry.id,
            peer = %entry.address,
            direction = ?entry.direction,
            "peer registered"
        );
        self.peers.insert(entry.id, entry);
        true
    }

    /// Remove a connection. Wakes the reconnect task when no peers remain.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<PeerEntry> {
        let entry = self.peers.remove(&id)?;
        if let Some(uuid) = &entry.node_uuid {
            if self.uuids.get(uuid) == Some(&id) {
                self.uuids.remove(uuid);
            }
        }
        tracing::debug!(
            id,
            peer = %entry.address,
            uuid = entry.node_uuid.as_deref().unwrap_or("unknown"),
            remaining = self.peers.len(),
            "peer unregistered"
        );
        if self.peers.is_empty() {
            tracing::info!("no peers left, requesting bootstrap reconnection");
            self.reconnect.notify_one();
        }
        Some(entry)
    }

    /// Whether `uuid` belongs to a registered connection other than `candidate`.
    pub fn is_duplicate_uuid(&self, uuid: &str, candidate: ConnectionId) -> bool {
        self.uuids
            .get(uuid)
            .is_some_and(|&owner| owner != candidate && self.peers.contains_key(&owner))
    }

    /// Resolve a completed handshake: reject our own UUID and duplicates,
    /// otherwise bind `uuid` to connection `id`.
    pub fn try_claim_uuid(&mut self, id: ConnectionId, uuid: &str) -> UuidClaim {
        if uuid == self.local_uuid {
            return UuidClaim::SelfConnection;
        }
        if self.is_duplicate_uuid(uuid, id) {
            return UuidClaim::Duplicate;
        }
        let Some(entry) = self.peers.get_mut(&id) else {
            return UuidClaim::NotRegistered;
        };
        entry.node_uuid = Some(uuid.to_string());
        self.uuids.insert(uuid.to_string(), id);
        self.known_uuids.insert(uuid.to_string());
        UuidClaim::Claimed
    }

    // -- Discovery -------------------------------------------------------------

    /// Merge addresses gossiped by a peer. Returns how many were new.
    pub fn update_peer_list(&mut self, peers: &[PeerAddress]) -> usize {
        let mut added = 0;
        for address in peers {
            if self.discovered.len() >= MAX_DISCOVERED_PEERS {
                tracing::debug!(limit = MAX_DISCOVERED_PEERS, "discovered peer table full");
                break;
            }
            if self.local_addresses.contains(address) || self.bootstrap.contains(address) {
                continue;
            }
            if self.discovered.insert(address.clone()) {
                added += 1;
            }
        }
        if added > 0 {
            tracing::debug!(added, total = self.discovered.len(), "peer list updated");
        }
        added
    }

    /// Bootstrap and discovered addresses without a live connection.
    pub fn reconnect_targets(&self) -> Vec<PeerAddress> {
        let connected: BTreeSet<&PeerAddress> =
            self.peers.values().map(|p| &p.address).collect();
        let mut targets: Vec<PeerAddress> = Vec::new();
        for address in self.bootstrap.iter().chain(self.discovered.iter()) {
            if !connected.contains(address)
                && !self.local_addresses.contains(address)
                && !targets.contains(address)
            {
                targets.push(address.clone());
            }
        }
        targets
    }

    /// Notified when the last peer disconnects.
    pub fn reconnect_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.reconnect)
    }

    // -- Queries ---------------------------------------------------------------

    /// Outbound queues of handshake-complete peers, minus `exclude`.
    pub fn handshaked_peers_except(
        &self,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, mpsc::Sender<Vec<u8>>)> {
        self.peers
            .values()
            .filter(|p| p.handshake_complete() && Some(p.id) != exclude)
            .map(|p| (p.id, p.outbound.clone()))
            .collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PeerEntry> {
        self.peers.get(&id)
    }

    pub fn connection_for_uuid(&self, uuid: &str) -> Option<ConnectionId> {
        self.uuids.get(uuid).copied()
    }

    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }

    pub fn handshaked_count(&self) -> usize {
        self.uuids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PeerInfo> {
        self.peers
            .values()
            .map(|p| PeerInfo {
                id: p.id,
                address: p.address.clone(),
                direction: p.direction,
                node_uuid: p.node_uuid.clone(),
            })
            .collect()
    }

    pub fn known_uuids(&self) -> &BTreeSet<String> {
        &self.known_uuids
    }

    pub fn discovered(&self) -> &BTreeSet<PeerAddress> {
        &self.discovered
    }

    pub fn bootstrap_peers(&self) -> &[PeerAddress] {
        &self.bootstrap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reg: &mut PeerRegistry, port: u16) -> (PeerEntry, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(8);
        let id = reg.allocate_id();
        (
            PeerEntry::new(id, PeerAddress::new("10.0.0.1", port), Direction::Inbound, tx),
            rx,
        )
    }

    #[test]
    fn register_is_idempotent() {
        let mut reg = PeerRegistry::new("self", vec![]);
        let (peer, _rx) = entry(&mut reg, 9000);
        assert!(reg.register(peer.clone()));
        assert!(!reg.register(peer));
        assert_eq!(reg.connected_count(), 1);
    }

    #[test]
    fn first_claim_wins_duplicate_uuid() {
        let mut reg = PeerRegistry::new("self", vec![]);
        let (a, _ra) = entry(&mut reg, 9000);
        let (b, _rb) = entry(&mut reg, 9001);
        let (a_id, b_id) = (a.id, b.id);
        reg.register(a);
        reg.register(b);

        assert_eq!(reg.try_claim_uuid(a_id, "node-x"), UuidClaim::Claimed);
        assert!(reg.is_duplicate_uuid("node-x", b_id));
        assert!(!reg.is_duplicate_uuid("node-x", a_id));
        assert_eq!(reg.try_claim_uuid(b_id, "node-x"), UuidClaim::Duplicate);
        assert_eq!(reg.connection_for_uuid("node-x"), Some(a_id));

        // Once the owner leaves the UUID is free again.
        reg.unregister(a_id);
        assert_eq!(reg.try_claim_uuid(b_id, "node-x"), UuidClaim::Claimed);
    }

    #[test]
    fn own_uuid_is_a_self_connection() {
        let mut reg = PeerRegistry::new("self", vec![]);
        let (a, _ra) = entry(&mut reg, 9000);
        let id = a.id;
        reg.register(a);
        assert_eq!(reg.try_claim_uuid(id, "self"), UuidClaim::SelfConnection);
        assert_eq!(reg.handshaked_count(), 0);
        assert!(reg.known_uuids().is_empty());
    }

    #[test]
    fn claim_on_closed_connection_is_rejected() {
        let mut reg = PeerRegistry::new("self", vec![]);
        assert_eq!(reg.try_claim_uuid(42, "node-x"), UuidClaim::NotRegistered);
    }

    #[tokio::test]
    async fn last_unregister_signals_reconnect() {
        let mut reg = PeerRegistry::new("self", vec![]);
        let signal = reg.reconnect_signal();
        let (a, _ra) = entry(&mut reg, 9000);
        let (b, _rb) = entry(&mut reg, 9001);
        let (a_id, b_id) = (a.id, b.id);
        reg.register(a);
        reg.register(b);

        reg.unregister(a_id);
        let early = tokio::time::timeout(std::time::Duration::from_millis(20), signal.notified());
        assert!(early.await.is_err());

        reg.unregister(b_id);
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
            .await
            .expect("reconnect signal");
    }

    #[test]
    fn broadcast_targets_skip_sender_and_unhandshaked() {
        let mut reg = PeerRegistry::new("self", vec![]);
        let (a, _ra) = entry(&mut reg, 9000);
        let (b, _rb) = entry(&mut reg, 9001);
        let (c, _rc) = entry(&mut reg, 9002);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        reg.register(a);
        reg.register(b);
        reg.register(c);
        reg.try_claim_uuid(a_id, "node-a");
        reg.try_claim_uuid(b_id, "node-b");

        let ids: Vec<ConnectionId> = reg
            .handshaked_peers_except(Some(a_id))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![b_id]);
        assert!(!ids.contains(&c_id));
        assert_eq!(reg.handshaked_peers_except(None).len(), 2);
    }

    #[test]
    fn peer_list_merge_ignores_duplicates_and_self() {
        let boot = PeerAddress::new("seed.example", 9828);
        let mut reg = PeerRegistry::new("self", vec![boot.clone()]);
        reg.add_local_address(PeerAddress::new("127.0.0.1", 9828));

        let gossip = vec![
            PeerAddress::new("10.1.1.1", 9828),
            PeerAddress::new("10.1.1.1", 9828),
            PeerAddress::new("127.0.0.1", 9828),
            boot.clone(),
            PeerAddress::new("10.1.1.2", 9828),
        ];
        assert_eq!(reg.update_peer_list(&gossip), 2);
        assert_eq!(reg.update_peer_list(&gossip), 0);

        let targets = reg.reconnect_targets();
        assert_eq!(targets[0], boot);
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn connected_addresses_are_not_reconnect_targets() {
        let boot = PeerAddress::new("10.0.0.1", 9000);
        let mut reg = PeerRegistry::new("self", vec![boot]);
        let (a, _ra) = entry(&mut reg, 9000);
        reg.register(a);
        assert!(reg.reconnect_targets().is_empty());
    }
}
