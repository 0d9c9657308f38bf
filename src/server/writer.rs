//! Per-connection writer task.
//!
//! Drains the connection's output queue to the socket. The task sleeps on
//! the connection's write interest while there is nothing to send, which
//! is the task-level equivalent of removing write interest from a
//! selector. When the connection is closing and the queue is empty, it
//! shuts the socket down and deregisters the connection.
//!
//! A buffer stays marked in flight until `write_all` returns, so the idle
//! reaper never takes a connection that is still being answered.

use crate::connection::{Connection, ConnectionError, ConnectionRegistry};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Runs the writer for `conn` until it closes, then removes it from
/// `registry`.
pub async fn run_writer<W>(conn: Arc<Connection>, writer: W, registry: Arc<ConnectionRegistry>)
where
    W: AsyncWrite + Unpin,
{
    let id = conn.id();
    match write_loop(&conn, writer, &registry).await {
        Ok(()) => debug!(conn = %id, "Writer finished"),
        Err(e) => info!(conn = %id, peer = %conn.peer(), error = %e, "Write failed, closing"),
    }
    registry.remove(id);
}

async fn write_loop<W>(
    conn: &Connection,
    mut writer: W,
    registry: &ConnectionRegistry,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let stats = registry.stats();

    loop {
        while let Some(buf) = conn.start_write() {
            let written = tokio::select! {
                result = writer.write_all(buf.as_slice()) => Some(result),
                _ = conn.shutdown_token().cancelled() => None,
            };
            let len = buf.len();
            conn.finish_write(buf);

            match written {
                Some(result) => result?,
                None => return Ok(()),
            }
            stats.bytes_written(len);
            conn.touch();
        }

        if conn.is_closing() {
            // Output queued just before the close request still goes out.
            if conn.output_is_empty() {
                break;
            }
            continue;
        }

        tokio::select! {
            _ = conn.write_ready() => {}
            _ = conn.shutdown_token().cancelled() => return Ok(()),
        }
    }

    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}
