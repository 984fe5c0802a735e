//! Socket driver for one [`Connection`].
//!
//! The read half feeds the state machine; a writer task drains the
//! connection's outbound queue into the write half. The session ends on
//! EOF, a read error, [`Flow::Close`] or node shutdown, and always releases
//! the connection's registrations.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::Instrument;

use beacon_network::Direction;
use beacon_types::PeerAddress;

use crate::connection::{Connection, Flow};
use crate::context::NodeContext;
use crate::shutdown::ShutdownSignal;
use crate::tracing_spans::connection_span;

/// Frames queued per connection before broadcasts to it start failing.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;
const READ_BUFFER_SIZE: usize = 64 * 1024;
/// How long queued frames may take to drain after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a connection to completion.
pub async fn run_session(
    ctx: Arc<NodeContext>,
    stream: TcpStream,
    address: PeerAddress,
    direction: Direction,
    mut shutdown: ShutdownSignal,
) {
    let id = ctx.registry.lock().await.allocate_id();
    let direction_name = match direction {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
    };
    let span = connection_span(&address.to_string(), id, direction_name);

    async move {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let (mut reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let mut writer_task = tokio::spawn(write_loop(writer, rx).in_current_span());

        let mut conn = Connection::new(ctx, id, address, direction, tx);
        match conn.on_connect().await {
            Ok(Flow::Continue) => read_loop(&mut conn, &mut reader, &mut shutdown).await,
            Ok(Flow::Close) => {}
            Err(e) => tracing::warn!(error = %e, "failed to open handshake"),
        }
        conn.on_disconnect().await;
        drop(conn);

        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task)
            .await
            .is_err()
        {
            writer_task.abort();
        }
    }
    .instrument(span)
    .await
}

async fn read_loop(
    conn: &mut Connection,
    reader: &mut OwnedReadHalf,
    shutdown: &mut ShutdownSignal,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::debug!("closing connection for shutdown");
                return;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("peer closed the connection");
                    return;
                }
                Ok(n) => {
                    if conn.on_data(&buf[..n]).await == Flow::Close {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "read failed");
                    return;
                }
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!(error = %e, "write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
