//! Spammer-record gossip and global unban propagation.
//!
//! A spammer broadcast is stored and relayed only when it carries data this
//! node does not already hold. A gunban is applied, then relayed to every
//! handshake-complete peer except the one it came from, once per event.

use serde_json::Value;
use tracing::Instrument;

use beacon_messages::{Gunban, Message, SpammerInfoBroadcast};
use beacon_network::{BroadcastResult, ConnectionId, MessageDedup};
use beacon_protocol::decode_nested_json;
use beacon_types::{GunbanEvent, SpammerRecord};

use crate::context::NodeContext;
use crate::tracing_spans::broadcast_span;
use crate::NodeError;

/// What happened to an inbound or locally published spammer record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Already seen on this connection.
    Duplicate,
    /// Identical to the stored record.
    Unchanged,
    Stored(BroadcastResult),
    /// A peer-list payload; the count of newly learned addresses.
    PeersMerged(usize),
    /// Neither a record nor a peer list.
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GunbanOutcome {
    /// Already applied and relayed once.
    Suppressed,
    Relayed(BroadcastResult),
}

// -- Spammer records ---------------------------------------------------------

/// Handle an inbound `spammer_info_broadcast` from connection `from`.
///
/// `seen` is the connection's own memory of broadcast hashes.
pub async fn on_spammer_broadcast(
    ctx: &NodeContext,
    from: ConnectionId,
    seen: &mut MessageDedup,
    raw: &Value,
) -> Result<RecordOutcome, NodeError> {
    let mut normalized = decode_nested_json(raw.clone());
    if let Some(fields) = normalized.as_object_mut() {
        fields.remove("signature");
    }
    let broadcast: SpammerInfoBroadcast = serde_json::from_value(normalized.clone())?;

    let Some(record) = broadcast.record() else {
        return Ok(match broadcast.peers {
            Some(peers) => {
                tracing::debug!(count = peers.len(), "received peer list");
                RecordOutcome::PeersMerged(ctx.registry.lock().await.update_peer_list(&peers))
            }
            None => {
                tracing::warn!("spammer broadcast without user_id or peers, dropping");
                RecordOutcome::Ignored
            }
        });
    };

    let hash = MessageDedup::hash_message(&normalized);
    if seen.is_duplicate(&hash) {
        tracing::debug!(user_id = %record.user_id, "broadcast already seen on this connection");
        ctx.metrics.broadcasts_suppressed.inc();
        return Ok(RecordOutcome::Duplicate);
    }

    let outcome = store_and_relay(ctx, record, Some(from)).await;
    if outcome.is_err() {
        // Let the peer's next copy retry the write.
        seen.forget(&hash);
    }
    outcome
}

/// Store a locally reported record and announce it to every peer.
pub async fn publish_record(
    ctx: &NodeContext,
    record: SpammerRecord,
) -> Result<RecordOutcome, NodeError> {
    store_and_relay(ctx, record, None).await
}

async fn store_and_relay(
    ctx: &NodeContext,
    record: SpammerRecord,
    from: Option<ConnectionId>,
) -> Result<RecordOutcome, NodeError> {
    let existing = ctx.load_record(&record.user_id).await?;
    if existing.as_ref() == Some(&record) {
        tracing::debug!(user_id = %record.user_id, "data is the same as stored, skipping");
        ctx.metrics.broadcasts_suppressed.inc();
        return Ok(RecordOutcome::Unchanged);
    }

    ctx.save_record(record.clone()).await?;
    ctx.metrics.records_stored.inc();

    let message = Message::SpammerInfoBroadcast(SpammerInfoBroadcast::from_record(&record)).to_value()?;
    let result = ctx
        .broadcast(message, from)
        .instrument(broadcast_span("spammer_info_broadcast"))
        .await?;
    ctx.metrics.broadcasts_sent.inc_by(result.sent as u64);
    tracing::info!(
        user_id = %record.user_id,
        is_spammer = record.is_spammer,
        sent = result.sent,
        failed = result.failed,
        "spammer record stored and broadcast"
    );
    Ok(RecordOutcome::Stored(result))
}

// -- Gunban ------------------------------------------------------------------

/// Apply a retraction and relay it to every peer except `from`.
///
/// `from` is `None` for locally originated events.
pub async fn on_gunban(
    ctx: &NodeContext,
    from: Option<ConnectionId>,
    event: GunbanEvent,
) -> Result<GunbanOutcome, NodeError> {
    let key = MessageDedup::hash_key(&event.dedup_key());
    if ctx.gunban_seen.lock().await.is_duplicate(&key) {
        tracing::debug!(
            spammer_id = %event.spammer_id,
            source = %event.source_node_uuid,
            "gunban already relayed, dropping"
        );
        ctx.metrics.gunbans_suppressed.inc();
        return Ok(GunbanOutcome::Suppressed);
    }

    match ctx.delete_record(&event.spammer_id).await {
        Ok(existed) => {
            ctx.metrics.gunbans_applied.inc();
            tracing::info!(
                spammer_id = %event.spammer_id,
                source = %event.source_node_uuid,
                legacy = event.is_legacy(),
                existed,
                "gunban applied"
            );
        }
        Err(e) => {
            // Peers still get the retraction even if our copy could not be removed.
            tracing::error!(spammer_id = %event.spammer_id, error = %e, "failed to apply gunban");
        }
    }

    let message = Message::Gunban(Gunban::from_event(&event)).to_value()?;
    let result = ctx
        .broadcast(message, from)
        .instrument(broadcast_span("gunban"))
        .await?;
    ctx.metrics.gunbans_relayed.inc_by(result.sent as u64);
    tracing::debug!(
        spammer_id = %event.spammer_id,
        sent = result.sent,
        failed = result.failed,
        excluded = ?from,
        "gunban relayed"
    );
    Ok(GunbanOutcome::Relayed(result))
}

/// Originate a gunban for `spammer_id` from this node.
pub async fn publish_gunban(
    ctx: &NodeContext,
    spammer_id: &str,
) -> Result<GunbanOutcome, NodeError> {
    let event = GunbanEvent::new(spammer_id, ctx.node_uuid(), ctx.now());
    on_gunban(ctx, None, event).await
}
