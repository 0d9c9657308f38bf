//! Server Module
//!
//! Wires the listener, the connection registry, the worker pool and the
//! idle reaper into one running news server.
//!
//! ## Task Layout
//!
//! ```text
//!                 ┌────────────┐
//!                 │  acceptor  │  accept, greet, spawn reader + writer
//!                 └─────┬──────┘
//!        ┌──────────────┴──────────────┐
//!        ▼                             ▼
//!  ┌──────────┐   ready queue   ┌──────────────┐   output queue   ┌──────────┐
//!  │  reader  │ ──────────────> │ worker pool  │ ───────────────> │  writer  │
//!  │ (per cx) │                 │  (N tasks)   │                  │ (per cx) │
//!  └──────────┘                 └──────────────┘                  └──────────┘
//!
//!  idle reaper: purges silent connections on an interval
//! ```

pub mod acceptor;
pub mod worker;
pub mod writer;

pub use acceptor::greeting;
pub use worker::WorkerPool;

use crate::buffer::BufferPool;
use crate::commands::{CommandTable, Services};
use crate::config::ServerConfig;
use crate::connection::{
    ConnectionError, ConnectionRegistry, ConnectionStats, IdleReaper, ReaperConfig,
};
use crate::storage::{ArticleStore, FeedQueue, MailGateway};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

/// A bound, not yet running, news server.
#[derive(Debug)]
pub struct NewsServer {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    services: Services,
}

impl NewsServer {
    /// Binds the listening socket and builds the shared services.
    pub async fn bind(
        config: ServerConfig,
        store: Arc<dyn ArticleStore>,
        gateway: Arc<dyn MailGateway>,
        feed: FeedQueue,
    ) -> Result<Self, ConnectionError> {
        let listener = TcpListener::bind(config.bind_address()).await?;

        let pool = Arc::new(BufferPool::new(
            config.buffer_capacity,
            config.buffer_pool_size,
        ));
        let registry = Arc::new(ConnectionRegistry::new(
            pool,
            Arc::new(ConnectionStats::new()),
        ));
        let services = Services {
            store,
            gateway,
            feed,
            config: Arc::new(config),
            commands: Arc::new(CommandTable::standard()),
        };

        Ok(Self {
            listener,
            registry,
            services,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConnectionError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        self.registry.stats()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.services.config
    }

    /// Serves clients forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Serves clients until `shutdown` resolves, then closes every
    /// connection and stops the workers.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let config = Arc::clone(&self.services.config);
        let (ready_tx, ready_rx) = mpsc::channel(config.ready_queue_capacity.max(1));

        let workers = WorkerPool::start(
            config.worker_count,
            ready_rx,
            ready_tx.clone(),
            Arc::clone(&self.registry),
            self.services.clone(),
        );
        let reaper = IdleReaper::start(
            Arc::clone(&self.registry),
            ReaperConfig {
                interval: config.reaper_interval,
                timeout: config.idle_timeout,
            },
        );

        tokio::pin!(shutdown);
        tokio::select! {
            _ = acceptor::accept_loop(
                &self.listener,
                Arc::clone(&self.registry),
                ready_tx,
                &config.hostname,
            ) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
            }
        }

        reaper.stop();
        let closed = self.registry.close_all();
        workers.shutdown().await;

        let stats = self.registry.stats();
        let pool = self.registry.pool().stats();
        info!(
            closed = closed,
            accepted = stats.connections_accepted.load(Ordering::Relaxed),
            lines = stats.lines_processed.load(Ordering::Relaxed),
            bytes_read = stats.bytes_read.load(Ordering::Relaxed),
            bytes_written = stats.bytes_written.load(Ordering::Relaxed),
            idle_purged = stats.purged_idle.load(Ordering::Relaxed),
            buffers_allocated = pool.allocated,
            buffers_reused = pool.reused,
            "Server stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LoggingGateway, MemoryStore};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn start(store: Arc<MemoryStore>) -> (SocketAddr, Arc<ConnectionStats>, oneshot::Sender<()>) {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            hostname: "news.test".to_string(),
            worker_count: 2,
            ..ServerConfig::default()
        };
        let (feed, _rx) = FeedQueue::new();
        let server = NewsServer::bind(config, store, Arc::new(LoggingGateway), feed)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let stats = Arc::clone(server.stats());
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));
        (addr, stats, stop_tx)
    }

    async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_session_over_tcp() {
        let store = Arc::new(MemoryStore::new());
        store.create_group("misc.test", "Testing");
        let (addr, stats, _stop) = start(store).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let greeting = read_line(&mut reader).await;
        assert!(greeting.starts_with("200 news.test newsd "));

        write_half.write_all(b"GROUP missing.group\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "411 no such news group\r\n");

        // Two commands in one segment.
        write_half
            .write_all(b"GROUP misc.test\r\nMODE READER\r\n")
            .await
            .unwrap();
        assert_eq!(read_line(&mut reader).await, "211 0 1 0 misc.test\r\n");
        assert!(read_line(&mut reader).await.starts_with("200"));

        write_half.write_all(b"QUIT\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "205 closing connection\r\n");

        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), reader.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.lines_processed.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_post_over_tcp() {
        let store = Arc::new(MemoryStore::new());
        store.create_group("misc.test", "Testing");
        let (addr, _stats, _stop) = start(Arc::clone(&store)).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        read_line(&mut reader).await;

        write_half.write_all(b"POST\r\n").await.unwrap();
        assert!(read_line(&mut reader).await.starts_with("340"));

        write_half
            .write_all(b"Newsgroups: misc.test\r\nSubject: hi\r\n\r\nhello\r\n.\r\n")
            .await
            .unwrap();
        assert!(read_line(&mut reader).await.starts_with("240"));
        assert_eq!(store.article_count(), 1);
    }

    #[tokio::test]
    async fn test_pipelined_commands_answered_after_half_close() {
        let store = Arc::new(MemoryStore::new());
        store.create_group("misc.test", "Testing");
        let (addr, _stats, _stop) = start(Arc::clone(&store)).await;

        for _ in 0..5 {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            write_half
                .write_all(b"GROUP missing.group\r\nQUIT\r\n")
                .await
                .unwrap();
            write_half.shutdown().await.unwrap();

            let mut received = String::new();
            let mut reader = BufReader::new(read_half);
            tokio::time::timeout(Duration::from_secs(2), reader.read_to_string(&mut received))
                .await
                .unwrap()
                .unwrap();

            let lines: Vec<&str> = received.split_inclusive("\r\n").collect();
            assert_eq!(lines.len(), 3);
            assert!(lines[0].starts_with("200"));
            assert_eq!(lines[1], "411 no such news group\r\n");
            assert_eq!(lines[2], "205 closing connection\r\n");
        }

        // A whole POST sent before the half-close is still filed.
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(b"POST\r\nNewsgroups: misc.test\r\n\r\nbody\r\n.\r\n")
            .await
            .unwrap();
        write_half.shutdown().await.unwrap();

        let mut received = String::new();
        let mut reader = BufReader::new(read_half);
        tokio::time::timeout(Duration::from_secs(2), reader.read_to_string(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert!(received.contains("\r\n240 "));
        assert_eq!(store.article_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let (addr, stats, stop) = start(Arc::new(MemoryStore::new())).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"200");

        stop.send(()).unwrap();
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
