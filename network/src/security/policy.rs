//! Security policy snapshot.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of the sliding window for connection and message rate limits.
pub const RATE_WINDOW_SECS: f64 = 60.0;

/// Maximum accepted clock difference for handshake authentication.
pub const AUTH_REPLAY_WINDOW_SECS: f64 = 300.0;

/// The reloadable part of the security configuration.
///
/// Read from the `[security]` table of the node configuration file. A
/// snapshot is immutable once loaded; reloading swaps in a new one.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Master switch. When off every admission check passes.
    pub enabled: bool,
    /// Shared network secret for handshake tokens and message signatures.
    pub secret_key: String,
    pub max_connections_per_ip: usize,
    /// Connections per IP per [`RATE_WINDOW_SECS`].
    pub connection_rate_limit: usize,
    /// Messages per IP per [`RATE_WINDOW_SECS`].
    pub message_rate_limit: usize,
    pub require_authentication: bool,
    /// Node UUID whitelist. Empty disables the whitelist.
    pub allowed_node_keys: BTreeSet<String>,
    pub blocked_node_keys: BTreeSet<String>,
    pub blocked_ips: BTreeSet<String>,
    pub enable_message_signing: bool,
    pub reject_unsigned: bool,
    /// Keep security events in the in-memory ring buffer.
    pub log_events: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            secret_key: String::new(),
            max_connections_per_ip: 5,
            connection_rate_limit: 10,
            message_rate_limit: 100,
            require_authentication: false,
            allowed_node_keys: BTreeSet::new(),
            blocked_node_keys: BTreeSet::new(),
            blocked_ips: BTreeSet::new(),
            enable_message_signing: false,
            reject_unsigned: false,
            log_events: true,
        }
    }
}

impl SecurityPolicy {
    /// Everything allowed, nothing tracked against limits.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn has_secret(&self) -> bool {
        !self.secret_key.is_empty()
    }

    pub fn whitelist_active(&self) -> bool {
        !self.allowed_node_keys.is_empty()
    }
}

impl fmt::Debug for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityPolicy")
            .field("enabled", &self.enabled)
            .field("secret_key", &if self.has_secret() { "<redacted>" } else { "<empty>" })
            .field("max_connections_per_ip", &self.max_connections_per_ip)
            .field("connection_rate_limit", &self.connection_rate_limit)
            .field("message_rate_limit", &self.message_rate_limit)
            .field("require_authentication", &self.require_authentication)
            .field("allowed_node_keys", &self.allowed_node_keys)
            .field("blocked_node_keys", &self.blocked_node_keys)
            .field("blocked_ips", &self.blocked_ips)
            .field("enable_message_signing", &self.enable_message_signing)
            .field("reject_unsigned", &self.reject_unsigned)
            .field("log_events", &self.log_events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let policy: SecurityPolicy = toml::from_str(
            r#"
            require_authentication = true
            blocked_ips = ["10.0.0.9"]
            "#,
        )
        .unwrap();
        assert!(policy.enabled);
        assert!(policy.require_authentication);
        assert_eq!(policy.max_connections_per_ip, 5);
        assert_eq!(policy.connection_rate_limit, 10);
        assert_eq!(policy.message_rate_limit, 100);
        assert!(policy.blocked_ips.contains("10.0.0.9"));
        assert!(!policy.whitelist_active());
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let policy = SecurityPolicy {
            secret_key: "hunter2".into(),
            ..SecurityPolicy::default()
        };
        let rendered = format!("{policy:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
