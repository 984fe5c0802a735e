//! Peer network addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A dialable peer address.
///
/// Deserializes from either `"host:port"` or `{"host": ..., "port": ...}`,
/// the two shapes peers use when gossiping address lists.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPeerAddress")]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| format!("peer address '{s}' is missing a port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("peer address '{s}' is missing a host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in peer address '{s}': {e}"))?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for PeerAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPeerAddress {
    Text(String),
    Parts { host: String, port: u16 },
}

impl TryFrom<RawPeerAddress> for PeerAddress {
    type Error = String;

    fn try_from(raw: RawPeerAddress) -> Result<Self, Self::Error> {
        match raw {
            RawPeerAddress::Text(s) => s.parse(),
            RawPeerAddress::Parts { host, port } => Ok(Self::new(host, port)),
        }
    }
}
