//! Bootstrap reconnection.
//!
//! Woken by the peer registry whenever the node runs out of peers. Each
//! wake-up dials every bootstrap and discovered address not currently
//! connected, backing off exponentially until at least one dial succeeds.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use beacon_types::PeerAddress;

use crate::context::NodeContext;
use crate::peer_connector::connect_to_peer;
use crate::shutdown::ShutdownController;
use crate::tracing_spans::reconnect_span;

#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
}

impl ReconnectPolicy {
    /// The delay following `delay`, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        (delay * 2).min(self.max_delay)
    }
}

/// Run until shutdown.
pub async fn reconnect_loop(
    ctx: Arc<NodeContext>,
    policy: ReconnectPolicy,
    shutdown: Arc<ShutdownController>,
) {
    let signal = ctx.registry.lock().await.reconnect_signal();
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => return,
            _ = signal.notified() => {}
        }

        let mut delay = policy.initial_delay;
        let mut attempt: u32 = 0;
        loop {
            // Let a burst of disconnects settle before dialling.
            tokio::select! {
                biased;
                _ = stop.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let targets = {
                let registry = ctx.registry.lock().await;
                if !registry.is_empty() {
                    break;
                }
                registry.reconnect_targets()
            };
            if targets.is_empty() {
                tracing::debug!("no bootstrap or discovered peers to reconnect to");
                break;
            }

            attempt += 1;
            let connected = dial_all(&ctx, &targets, &policy, &shutdown)
                .instrument(reconnect_span(attempt, targets.len()))
                .await;
            if connected > 0 {
                tracing::info!(connected, attempt, "reconnected to peers");
                break;
            }

            delay = policy.next_delay(delay);
            tracing::warn!(attempt, retry_in = ?delay, "no peer reachable, retrying");
        }
    }
}

async fn dial_all(
    ctx: &Arc<NodeContext>,
    targets: &[PeerAddress],
    policy: &ReconnectPolicy,
    shutdown: &ShutdownController,
) -> usize {
    let mut connected = 0;
    for address in targets {
        match connect_to_peer(
            Arc::clone(ctx),
            address,
            policy.connect_timeout,
            shutdown.subscribe(),
        )
        .await
        {
            Ok(_) => connected += 1,
            Err(e) => tracing::debug!(peer = %address, error = %e, "reconnect attempt failed"),
        }
    }
    connected
}
