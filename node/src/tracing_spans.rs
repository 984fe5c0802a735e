//! Pre-built [`tracing::Span`] constructors for common node operations.
//!
//! Using consistent span names and field sets makes it easy to filter and
//! correlate one peer's traffic across log lines.

use tracing::{info_span, Span};

/// Span covering the lifetime of one peer connection.
pub fn connection_span(peer: &str, connection_id: u64, direction: &str) -> Span {
    info_span!("connection", peer = %peer, id = connection_id, direction = %direction)
}

/// Span covering the handling of a single inbound peer message.
pub fn message_span(peer: &str, msg_type: &str) -> Span {
    info_span!("message", peer = %peer, msg_type = %msg_type)
}

/// Span covering the broadcast of a message to connected peers.
pub fn broadcast_span(msg_type: &str) -> Span {
    info_span!("broadcast", msg_type = %msg_type)
}

/// Span covering one bootstrap reconnection round.
pub fn reconnect_span(attempt: u32, targets: usize) -> Span {
    info_span!("reconnect", attempt = attempt, targets = targets)
}
