//! Point-to-point `check_p2p_data` requests.

use std::sync::Arc;

use tokio::task::JoinSet;

use beacon_messages::{CheckP2pData, CheckP2pDataResponse, Message};
use beacon_network::ConnectionId;
use beacon_types::SpammerRecord;

use crate::context::NodeContext;
use crate::{NodeError, RequestError};

/// Ask one handshake-complete peer about `user_id` and wait for the answer.
pub async fn check_peer(
    ctx: &NodeContext,
    connection: ConnectionId,
    user_id: &str,
) -> Result<CheckP2pDataResponse, NodeError> {
    let outbound = ctx
        .registry
        .lock()
        .await
        .get(connection)
        .filter(|peer| peer.handshake_complete())
        .map(|peer| peer.outbound.clone())
        .ok_or(RequestError::NotConnected(connection))?;

    let slot = ctx.pending.register(connection).await?;
    let message = Message::CheckP2pData(CheckP2pData {
        user_id: user_id.to_string(),
    });

    let frame = match message.to_value() {
        Ok(value) => ctx.seal(value).await,
        Err(e) => Err(e.into()),
    };
    let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
            ctx.pending.cancel(&slot).await;
            return Err(e);
        }
    };
    if outbound.send(frame).await.is_err() {
        ctx.pending.cancel(&slot).await;
        return Err(RequestError::NotConnected(connection).into());
    }

    Ok(ctx.pending.wait(slot, ctx.settings.request_timeout).await?)
}

/// Ask every handshake-complete peer and return the first positive answer.
///
/// Peers that fail or time out are skipped. Requests still running when an
/// answer arrives are left to finish on their own so their slots resolve.
pub async fn query_peers(
    ctx: Arc<NodeContext>,
    user_id: &str,
) -> Result<Option<SpammerRecord>, NodeError> {
    let peers: Vec<ConnectionId> = ctx
        .registry
        .lock()
        .await
        .handshaked_peers_except(None)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    if peers.is_empty() {
        tracing::debug!(user_id, "no peers to query");
        return Ok(None);
    }

    let mut requests = JoinSet::new();
    for id in peers {
        let ctx = Arc::clone(&ctx);
        let user_id = user_id.to_string();
        requests.spawn(async move { (id, check_peer(&ctx, id, &user_id).await) });
    }

    while let Some(joined) = requests.join_next().await {
        let (id, answer) = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "peer query task failed");
                continue;
            }
        };
        match answer {
            Ok(response) => {
                if let Some(record) = response.into_record() {
                    tracing::info!(user_id, connection = id, "peer has spammer data");
                    requests.detach_all();
                    return Ok(Some(record));
                }
            }
            Err(e) => {
                tracing::debug!(user_id, connection = id, error = %e, "peer query failed");
            }
        }
    }
    Ok(None)
}
