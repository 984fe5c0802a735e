//! Flood-style fan-out of one encoded message to many peers.
//!
//! Nothing here writes to a socket. Each target is a connection's outbound
//! queue; the connection's writer task drains it. A full or closed queue
//! counts as a failure for that peer and never blocks the others.

use tokio::sync::mpsc;

use crate::registry::ConnectionId;

/// Outcome of a broadcast attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Number of peers the message was queued for.
    pub sent: usize,
    /// Number of peers whose queue was full or closed.
    pub failed: usize,
}

impl BroadcastResult {
    pub fn attempted(&self) -> usize {
        self.sent + self.failed
    }
}

/// Queue `frame` on every target.
pub fn broadcast_frame(
    frame: &[u8],
    targets: &[(ConnectionId, mpsc::Sender<Vec<u8>>)],
) -> BroadcastResult {
    let mut result = BroadcastResult::default();

    for (id, tx) in targets {
        match tx.try_send(frame.to_vec()) {
            Ok(()) => result.sent += 1,
            Err(e) => {
                tracing::debug!(peer = id, error = %e, "failed to queue broadcast");
                result.failed += 1;
            }
        }
    }

    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
