//! Accepting clients and reading their input.
//!
//! Every accepted socket is split in two. The read half is owned by a
//! reader task that frames bytes into lines and, whenever at least one
//! complete line is waiting, posts the connection's id on the ready queue.
//! The write half goes to the writer task.
//!
//! The reader pauses while its connection has a full pending-line queue.
//! At end of input it marks the connection read-closed and posts the id
//! once more, so a worker answers the remaining lines and then closes.

use crate::buffer::Charset;
use crate::connection::{Connection, ConnectionError, ConnectionId, ConnectionRegistry};
use crate::protocol::codes;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::writer::run_writer;

/// The first line every client receives.
pub fn greeting(hostname: &str) -> String {
    format!(
        "{} {} newsd {} ready - posting allowed\r\n",
        codes::POSTING_ALLOWED,
        hostname,
        crate::VERSION
    )
}

/// Accepts clients until the listener fails permanently or the future is
/// dropped.
pub async fn accept_loop(
    listener: &TcpListener,
    registry: Arc<ConnectionRegistry>,
    ready: mpsc::Sender<ConnectionId>,
    hostname: &str,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                if let Err(e) = start_connection(stream, &registry, &ready, hostname) {
                    error!("Failed to register connection: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Registers a freshly accepted socket, queues the greeting and spawns its
/// reader and writer tasks.
pub fn start_connection(
    stream: TcpStream,
    registry: &Arc<ConnectionRegistry>,
    ready: &mpsc::Sender<ConnectionId>,
    hostname: &str,
) -> Result<Arc<Connection>, ConnectionError> {
    let peer = stream.peer_addr()?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
    }

    let conn = registry.open(peer);
    info!(conn = %conn.id(), peer = %peer, "Client connected");
    conn.enqueue_output(&greeting(hostname), Charset::Utf8);

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(run_writer(Arc::clone(&conn), write_half, Arc::clone(registry)));
    tokio::spawn(run_reader(
        Arc::clone(&conn),
        read_half,
        ready.clone(),
        Arc::clone(registry),
    ));
    Ok(conn)
}

/// Runs the reader for `conn` until the client goes away or the connection
/// is torn down.
pub async fn run_reader<R>(
    conn: Arc<Connection>,
    reader: R,
    ready: mpsc::Sender<ConnectionId>,
    registry: Arc<ConnectionRegistry>,
) where
    R: AsyncRead + Unpin,
{
    let id = conn.id();
    match read_loop(&conn, reader, &ready, &registry).await {
        Ok(()) => debug!(conn = %id, "Reader finished"),
        Err(ConnectionError::ClientDisconnected) => {
            info!(conn = %id, peer = %conn.peer(), "Client disconnected");
            conn.mark_read_closed();
            let notified = tokio::select! {
                sent = ready.send(id) => sent.is_ok(),
                _ = conn.shutdown_token().cancelled() => true,
            };
            if !notified {
                conn.close_after_flush();
            }
        }
        Err(e) => {
            info!(conn = %id, peer = %conn.peer(), error = %e, "Read failed, closing");
            registry.remove(id);
        }
    }
}

async fn read_loop<R>(
    conn: &Connection,
    mut reader: R,
    ready: &mpsc::Sender<ConnectionId>,
    registry: &ConnectionRegistry,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let stats = registry.stats();
    let mut buffer = BytesMut::with_capacity(conn.pool().buffer_capacity());

    loop {
        tokio::select! {
            _ = conn.wait_for_input_room() => {}
            _ = conn.shutdown_token().cancelled() => return Ok(()),
        }

        let n = tokio::select! {
            result = reader.read_buf(&mut buffer) => result?,
            _ = conn.shutdown_token().cancelled() => return Ok(()),
        };
        if n == 0 {
            return Err(ConnectionError::ClientDisconnected);
        }
        stats.bytes_read(n);

        let lines = conn.feed(&buffer[..n]);
        buffer.clear();
        if lines == 0 || conn.is_closing() {
            continue;
        }

        tokio::select! {
            sent = ready.send(conn.id()) => {
                if sent.is_err() {
                    return Err(ConnectionError::Closed);
                }
            }
            _ = conn.shutdown_token().cancelled() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::connection::{ConnectionStats, MAX_PENDING_LINES};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(
            Arc::new(BufferPool::new(64, 64)),
            Arc::new(ConnectionStats::new()),
        ))
    }

    #[test]
    fn test_greeting() {
        let line = greeting("news.example.org");
        assert!(line.starts_with("200 news.example.org newsd "));
        assert!(line.ends_with(" ready - posting allowed\r\n"));
    }

    #[tokio::test]
    async fn test_reader_notifies_once_per_read_with_lines() {
        let registry = registry();
        let conn = registry.open("127.0.0.1:6000".parse().unwrap());
        let (mut client, server) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(8);

        let task = tokio::spawn(run_reader(Arc::clone(&conn), server, tx, Arc::clone(&registry)));

        client.write_all(b"GRO").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        client.write_all(b"UP misc.test\r\nDATE\r\n").await.unwrap();
        let id = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, conn.id());

        let first = conn.next_line().unwrap();
        assert_eq!(first.as_slice(), b"GROUP misc.test\r");
        conn.pool().recycle(first);

        drop(client);
        task.await.unwrap();
        assert_eq!(registry.stats().bytes_read.load(Ordering::Relaxed), 23);
    }

    #[tokio::test]
    async fn test_end_of_input_leaves_pending_lines_for_workers() {
        let registry = registry();
        let conn = registry.open("127.0.0.1:6002".parse().unwrap());
        let (mut client, server) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(8);

        let task = tokio::spawn(run_reader(Arc::clone(&conn), server, tx, Arc::clone(&registry)));

        client.write_all(b"GROUP missing.group\r\nQUIT\r\n").await.unwrap();
        client.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(conn.is_read_closed());
        assert!(!conn.is_closing());
        assert_eq!(conn.pending_len(), 2);

        // One notification for the lines, one for the end of input.
        assert_eq!(rx.recv().await, Some(conn.id()));
        assert_eq!(rx.recv().await, Some(conn.id()));
    }

    #[tokio::test]
    async fn test_reader_pauses_while_pending_queue_is_full() {
        let registry = registry();
        let conn = registry.open("127.0.0.1:6003".parse().unwrap());
        let (mut client, server) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let task = tokio::spawn(run_reader(Arc::clone(&conn), server, tx, Arc::clone(&registry)));

        let total = MAX_PENDING_LINES * 2;
        client.write_all(&b"DATE\r\n".repeat(total)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A single read frames at most one buffer's worth of lines.
        let read_limit = conn.pool().buffer_capacity() / 6 + 1;
        let waiting = conn.pending_len();
        assert!(waiting >= MAX_PENDING_LINES);
        assert!(waiting < MAX_PENDING_LINES + read_limit);
        assert!(registry.stats().bytes_read.load(Ordering::Relaxed) < (total * 6) as u64);

        let mut taken = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while taken < total && tokio::time::Instant::now() < deadline {
            match conn.next_line() {
                Some(line) => {
                    conn.pool().recycle(line);
                    taken += 1;
                }
                None => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }
        assert_eq!(taken, total);

        conn.abort();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_stops_on_abort() {
        let registry = registry();
        let conn = registry.open("127.0.0.1:6001".parse().unwrap());
        let (_client, server) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::channel(8);

        let task = tokio::spawn(run_reader(Arc::clone(&conn), server, tx, Arc::clone(&registry)));
        conn.abort();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
