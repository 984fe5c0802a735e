use std::time::Duration;

use thiserror::Error;

use beacon_network::ConnectionId;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("network error: {0}")]
    Network(#[from] beacon_network::NetworkError),

    #[error("security error: {0}")]
    Security(#[from] beacon_network::SecurityError),

    #[error("store error: {0}")]
    Store(#[from] beacon_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] beacon_store_lmdb::LmdbError),

    #[error("protocol error: {0}")]
    Protocol(#[from] beacon_protocol::ProtocolError),

    #[error("message encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(#[from] RequestError),

    #[error("config error: {0}")]
    Config(String),

    #[error("node not started")]
    NotStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Failure of a point-to-point `check_p2p_data` request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("connection lost before the answer arrived")]
    ConnectionLost,

    #[error("a request is already pending on connection {0}")]
    Busy(ConnectionId),

    #[error("connection {0} is not open")]
    NotConnected(ConnectionId),
}
