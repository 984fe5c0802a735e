//! Bounded memory of recently seen content hashes.
//!
//! Used twice by the node: once per connection for `spammer_info_broadcast`
//! payloads, and once node-wide for gunban event identities. Entries are
//! forgotten oldest-first once the capacity is reached.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

pub const DEFAULT_DEDUP_CAPACITY: usize = 65_536;

pub type ContentHash = [u8; 32];

#[derive(Debug)]
pub struct MessageDedup {
    capacity: usize,
    members: HashSet<ContentHash>,
    arrival: VecDeque<ContentHash>,
}

impl MessageDedup {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let initial = capacity.min(1024);
        Self {
            capacity,
            members: HashSet::with_capacity(initial),
            arrival: VecDeque::with_capacity(initial),
        }
    }

    /// Record `hash`, returning whether it was already present.
    pub fn is_duplicate(&mut self, hash: &ContentHash) -> bool {
        if !self.members.insert(*hash) {
            return true;
        }
        self.arrival.push_back(*hash);
        while self.arrival.len() > self.capacity {
            if let Some(evicted) = self.arrival.pop_front() {
                self.members.remove(&evicted);
            }
        }
        false
    }

    /// Drop `hash` so the same content is processed again when it next
    /// arrives. Used when handling it failed part way.
    pub fn forget(&mut self, hash: &ContentHash) -> bool {
        if !self.members.remove(hash) {
            return false;
        }
        self.arrival.retain(|h| h != hash);
        true
    }

    /// Key-order independent hash of a JSON payload.
    pub fn hash_message(message: &Value) -> ContentHash {
        beacon_crypto::content_hash(message)
    }

    pub fn hash_key(key: &str) -> ContentHash {
        beacon_crypto::sha256(key.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Default for MessageDedup {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
