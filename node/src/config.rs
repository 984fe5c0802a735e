//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_network::SecurityPolicy;
use beacon_types::PeerAddress;
use beacon_utils::LogFormat;

use crate::NodeError;

/// Configuration for a beacon node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). The `[security]` table is the
/// hot-reloadable part; everything else is read once at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Interface to accept peer connections on.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Port to listen on for P2P connections. `0` picks a free port.
    #[serde(default = "default_p2p_port")]
    pub port: u16,

    /// This node's identity on the network. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_uuid: Option<String>,

    /// Version string announced in handshakes.
    #[serde(default = "default_node_version")]
    pub node_version: String,

    /// Data directory for the spammer database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How long a `check_p2p_data` request waits for its answer.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// First retry delay after the node runs out of peers; doubles per
    /// failed round up to `reconnect_max_delay_secs`.
    #[serde(default = "default_reconnect_initial_delay_secs")]
    pub reconnect_initial_delay_secs: u64,

    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,

    /// Per-connection memory of recently seen broadcast hashes.
    #[serde(default = "default_seen_cache_capacity")]
    pub seen_cache_capacity: usize,

    /// Node-wide memory of recently relayed gunban events.
    #[serde(default = "default_gunban_dedup_capacity")]
    pub gunban_dedup_capacity: usize,

    /// Largest JSON object accepted from a peer, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Peers dialled on startup and whenever the node loses all peers.
    #[serde(default)]
    pub bootstrap_peers: Vec<PeerAddress>,

    #[serde(default)]
    pub security: SecurityPolicy,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_p2p_port() -> u16 {
    9828
}

fn default_node_version() -> String {
    beacon_protocol::NODE_VERSION.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./beacon_data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_reconnect_initial_delay_secs() -> u64 {
    1
}

fn default_reconnect_max_delay_secs() -> u64 {
    60
}

fn default_seen_cache_capacity() -> usize {
    4096
}

fn default_gunban_dedup_capacity() -> usize {
    beacon_network::DEFAULT_DEDUP_CAPACITY
}

fn default_max_frame_size() -> usize {
    beacon_protocol::MAX_MESSAGE_SIZE
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_initial_delay_secs.max(1))
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs.max(self.reconnect_initial_delay_secs).max(1))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            port: default_p2p_port(),
            node_uuid: None,
            node_version: default_node_version(),
            bootstrap_peers: Vec::new(),
            data_dir: default_data_dir(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_initial_delay_secs: default_reconnect_initial_delay_secs(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            seen_cache_capacity: default_seen_cache_capacity(),
            gunban_dedup_capacity: default_gunban_dedup_capacity(),
            max_frame_size: default_max_frame_size(),
            security: SecurityPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig {
            bootstrap_peers: vec![PeerAddress::new("seed.example", 9828)],
            ..NodeConfig::default()
        };
        let toml_str = config.to_toml_string().expect("serializable");
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.port, config.port);
        assert_eq!(parsed.bootstrap_peers, config.bootstrap_peers);
        assert_eq!(parsed.security, config.security);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.port, 9828);
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.node_uuid, None);
        assert!(config.security.enabled);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            port = 9999
            node_uuid = "node-a"
            log_format = "json"
            bootstrap_peers = ["10.0.0.1:9828", { host = "10.0.0.2", port = 9829 }]

            [security]
            require_authentication = true
            secret_key = "s3cret"
            allowed_node_keys = ["node-b"]
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.port, 9999);
        assert_eq!(config.node_uuid.as_deref(), Some("node-a"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.bootstrap_peers[1], PeerAddress::new("10.0.0.2", 9829));
        assert!(config.security.require_authentication);
        assert!(config.security.allowed_node_keys.contains("node-b"));
        assert_eq!(config.security.message_rate_limit, 100);
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/beacon.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn reconnect_delays_are_never_zero() {
        let config = NodeConfig {
            reconnect_initial_delay_secs: 0,
            reconnect_max_delay_secs: 0,
            ..NodeConfig::default()
        };
        assert_eq!(config.reconnect_initial_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay(), Duration::from_secs(1));
    }
}
