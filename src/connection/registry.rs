//! Connection registry.
//!
//! Every live connection is registered here under its [`ConnectionId`].
//! Workers resolve ready-queue notifications through it and the idle
//! reaper scans it.

use crate::buffer::BufferPool;
use crate::connection::handler::{Connection, ConnectionId, ConnectionStats};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// All live connections, keyed by id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    next_id: AtomicU64,
    pool: Arc<BufferPool>,
    stats: Arc<ConnectionStats>,
}

impl ConnectionRegistry {
    pub fn new(pool: Arc<BufferPool>, stats: Arc<ConnectionStats>) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            pool,
            stats,
        }
    }

    /// Creates and registers a connection for `peer`.
    pub fn open(&self, peer: SocketAddr) -> Arc<Connection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(id, peer, Arc::clone(&self.pool)));
        self.connections.insert(id, Arc::clone(&conn));
        self.stats.connection_opened();
        debug!(conn = %id, peer = %peer, "Connection registered");
        conn
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Deregisters a connection, cancels its tasks and recycles its buffers.
    ///
    /// Removing an id that is already gone is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let (_, conn) = self.connections.remove(&id)?;
        conn.abort();
        conn.release_buffers();
        self.stats.connection_closed();
        debug!(conn = %id, peer = %conn.peer(), "Connection deregistered");
        Some(conn)
    }

    /// Purges every connection idle for longer than `timeout` at `now`
    /// that has no queued or in-flight output. Returns the number purged.
    pub fn purge_idle(&self, now: Instant, timeout: Duration) -> usize {
        let expired: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| {
                let conn = entry.value();
                conn.idle_for(now) > timeout && conn.output_is_empty()
            })
            .map(|entry| *entry.key())
            .collect();

        let mut purged = 0;
        for id in expired {
            if let Some(conn) = self.remove(id) {
                self.stats.idle_purged();
                info!(conn = %id, peer = %conn.peer(), "Idle connection purged");
                purged += 1;
            }
        }
        purged
    }

    /// Tears down every connection. Used at shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}
