//! Outbound peer connections.
//!
//! Dials a peer and hands the stream to a session task; the handshake runs
//! inside the session like on an inbound connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use beacon_network::{Direction, NetworkError};
use beacon_types::PeerAddress;

use crate::context::NodeContext;
use crate::session::run_session;
use crate::shutdown::ShutdownSignal;

/// Dial `address` and spawn its session.
pub async fn connect_to_peer(
    ctx: Arc<NodeContext>,
    address: &PeerAddress,
    timeout: Duration,
    shutdown: ShutdownSignal,
) -> Result<JoinHandle<()>, NetworkError> {
    let target = address.to_string();
    let stream = tokio::time::timeout(timeout, TcpStream::connect(target.as_str()))
        .await
        .map_err(|_| NetworkError::Timeout(target.clone()))?
        .map_err(|e| NetworkError::ConnectionFailed(format!("{target}: {e}")))?;

    tracing::debug!(peer = %address, "outbound TCP connection established");
    Ok(tokio::spawn(run_session(
        ctx,
        stream,
        address.clone(),
        Direction::Outbound,
        shutdown,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_node;
    use crate::shutdown::ShutdownController;
    use beacon_network::SecurityPolicy;

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let node = test_node("self", SecurityPolicy::default());
        let shutdown = ShutdownController::new();
        let result = connect_to_peer(
            node.ctx.clone(),
            &PeerAddress::new("127.0.0.1", port),
            Duration::from_secs(2),
            shutdown.subscribe(),
        )
        .await;
        assert!(matches!(result, Err(NetworkError::ConnectionFailed(_))));
        assert!(node.ctx.registry.lock().await.snapshot().is_empty());
    }
}
