//! Global unban events.

use serde::{Deserialize, Serialize};

/// `source_node_uuid` assigned to retractions that arrive in a legacy message
/// shape without naming their origin.
pub const LEGACY_SOURCE: &str = "legacy";

/// "Remove this identity from every node's flagged set."
///
/// Not persisted: applying it deletes the stored record, then the event is
/// relayed to every other peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GunbanEvent {
    pub spammer_id: String,
    pub source_node_uuid: String,
    pub timestamp: f64,
}

impl GunbanEvent {
    pub fn new(spammer_id: impl Into<String>, source_node_uuid: impl Into<String>, timestamp: f64) -> Self {
        Self {
            spammer_id: spammer_id.into(),
            source_node_uuid: source_node_uuid.into(),
            timestamp,
        }
    }

    /// Whether the event arrived through one of the legacy message types.
    pub fn is_legacy(&self) -> bool {
        self.source_node_uuid == LEGACY_SOURCE
    }

    /// Identity of the event for relay suppression.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.spammer_id, self.source_node_uuid, self.timestamp)
    }
}
