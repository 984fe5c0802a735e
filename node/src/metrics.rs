//! Prometheus metrics for the beacon node.
//!
//! Counters and gauges covering connection admission, handshakes, message
//! filtering and gossip activity. The [`NodeMetrics`] struct owns a
//! dedicated [`Registry`] that an external surface can encode into the
//! Prometheus text exposition format.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Connections that passed admission.
    pub connections_accepted: IntCounter,
    /// Connections refused by admission or closed during the handshake.
    pub connections_rejected: IntCounter,
    pub handshakes_completed: IntCounter,
    /// JSON objects decoded from peer streams.
    pub messages_received: IntCounter,
    /// Messages dropped by the rate limit, authentication or signature checks.
    pub messages_rejected: IntCounter,
    /// Stream fragments that failed to decode.
    pub decode_errors: IntCounter,
    /// Spammer records written because a broadcast carried new data.
    pub records_stored: IntCounter,
    /// Broadcasts dropped as already seen or unchanged.
    pub broadcasts_suppressed: IntCounter,
    /// Per-peer sends of spammer broadcasts.
    pub broadcasts_sent: IntCounter,
    /// Gunban events applied to the local store.
    pub gunbans_applied: IntCounter,
    /// Per-peer sends of gunban relays.
    pub gunbans_relayed: IntCounter,
    /// Gunban events already relayed once and dropped.
    pub gunbans_suppressed: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Current number of open peer connections.
    pub peer_count: IntGauge,
    /// Current number of peers past the handshake.
    pub handshaked_peer_count: IntGauge,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        // Counters
        let connections_accepted = register_int_counter_with_registry!(
            Opts::new(
                "beacon_connections_accepted_total",
                "Peer connections that passed admission"
            ),
            registry
        )
        .expect("failed to register connections_accepted counter");

        let connections_rejected = register_int_counter_with_registry!(
            Opts::new(
                "beacon_connections_rejected_total",
                "Peer connections refused or closed during the handshake"
            ),
            registry
        )
        .expect("failed to register connections_rejected counter");

        let handshakes_completed = register_int_counter_with_registry!(
            Opts::new(
                "beacon_handshakes_completed_total",
                "Peer handshakes completed"
            ),
            registry
        )
        .expect("failed to register handshakes_completed counter");

        let messages_received = register_int_counter_with_registry!(
            Opts::new(
                "beacon_messages_received_total",
                "Messages decoded from peer streams"
            ),
            registry
        )
        .expect("failed to register messages_received counter");

        let messages_rejected = register_int_counter_with_registry!(
            Opts::new(
                "beacon_messages_rejected_total",
                "Messages dropped by security checks"
            ),
            registry
        )
        .expect("failed to register messages_rejected counter");

        let decode_errors = register_int_counter_with_registry!(
            Opts::new(
                "beacon_decode_errors_total",
                "Stream fragments that failed to decode"
            ),
            registry
        )
        .expect("failed to register decode_errors counter");

        let records_stored = register_int_counter_with_registry!(
            Opts::new(
                "beacon_records_stored_total",
                "Spammer records written from broadcasts"
            ),
            registry
        )
        .expect("failed to register records_stored counter");

        let broadcasts_suppressed = register_int_counter_with_registry!(
            Opts::new(
                "beacon_broadcasts_suppressed_total",
                "Spammer broadcasts dropped as seen or unchanged"
            ),
            registry
        )
        .expect("failed to register broadcasts_suppressed counter");

        let broadcasts_sent = register_int_counter_with_registry!(
            Opts::new(
                "beacon_broadcasts_sent_total",
                "Per-peer sends of spammer broadcasts"
            ),
            registry
        )
        .expect("failed to register broadcasts_sent counter");

        let gunbans_applied = register_int_counter_with_registry!(
            Opts::new(
                "beacon_gunbans_applied_total",
                "Gunban events applied to the local store"
            ),
            registry
        )
        .expect("failed to register gunbans_applied counter");

        let gunbans_relayed = register_int_counter_with_registry!(
            Opts::new(
                "beacon_gunbans_relayed_total",
                "Per-peer sends of gunban relays"
            ),
            registry
        )
        .expect("failed to register gunbans_relayed counter");

        let gunbans_suppressed = register_int_counter_with_registry!(
            Opts::new(
                "beacon_gunbans_suppressed_total",
                "Gunban events dropped as already relayed"
            ),
            registry
        )
        .expect("failed to register gunbans_suppressed counter");

        // Gauges
        let peer_count = register_int_gauge_with_registry!(
            Opts::new("beacon_peer_count", "Current number of open peer connections"),
            registry
        )
        .expect("failed to register peer_count gauge");

        let handshaked_peer_count = register_int_gauge_with_registry!(
            Opts::new(
                "beacon_handshaked_peer_count",
                "Current number of peers past the handshake"
            ),
            registry
        )
        .expect("failed to register handshaked_peer_count gauge");

        Self {
            registry,
            connections_accepted,
            connections_rejected,
            handshakes_completed,
            messages_received,
            messages_rejected,
            decode_errors,
            records_stored,
            broadcasts_suppressed,
            broadcasts_sent,
            gunbans_applied,
            gunbans_relayed,
            gunbans_suppressed,
            peer_count,
            handshaked_peer_count,
        }
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output_names_every_family() {
        let metrics = NodeMetrics::new();
        metrics.gunbans_relayed.inc_by(2);
        metrics.peer_count.set(3);
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("beacon_gunbans_relayed_total 2"));
        assert!(text.contains("beacon_peer_count 3"));
        assert!(text.contains("beacon_connections_rejected_total 0"));
    }
}
