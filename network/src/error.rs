use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection to {0} timed out")]
    Timeout(String),

    #[error("peer {0} not found")]
    PeerNotFound(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] beacon_protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("failed to read security policy from {path}: {source}")]
    PolicyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid security policy: {0}")]
    PolicyParse(String),

    #[error("authentication or signing is enabled but no network secret key is configured")]
    MissingSecretKey,

    #[error(transparent)]
    Crypto(#[from] beacon_crypto::CryptoError),
}
