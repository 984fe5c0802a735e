//! Node version advertised in handshakes.

/// Version string sent as `node_version`.
pub const NODE_VERSION: &str = "1.0.0";
