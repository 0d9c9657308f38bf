//! Connection State
//!
//! A [`Connection`] is everything the server knows about one client except
//! the socket itself. The socket halves live in the connection's reader and
//! writer tasks; every other component reaches the client through this
//! struct.
//!
//! ## Ownership of buffers
//!
//! ```text
//!   socket ──read──> LineFramer ──lines──> pending ──worker──> state machine
//!                                                                   │
//!   socket <─write── writer task <──buffers── output <──encode──────┘
//! ```
//!
//! Every buffer sits in exactly one place at a time: the framer's input
//! buffer, the pending-line queue, the output queue, a task that popped it,
//! or the pool's free list.
//!
//! The reader stops reading while [`MAX_PENDING_LINES`] lines are waiting
//! and resumes once a worker takes one. A buffer the writer is still
//! sending counts as queued output.
//!
//! ## Half-close
//!
//! When the client stops sending, the connection is marked read-closed.
//! Lines already received are still processed, and the connection closes
//! once the last of them has been answered.
//!
//! ## Read-lock
//!
//! Lines of one connection are processed by at most one worker at a time.
//! A worker claims the connection with [`ReadLock::try_lock`] using its own
//! non-zero token and must release it with the same token.

use crate::buffer::{encode, BufferPool, Charset, LineFramer, PooledBuffer};
use crate::protocol::ProtocolStateMachine;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Complete lines a connection may hold before its reader pauses.
pub const MAX_PENDING_LINES: usize = 128;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total protocol lines processed
    pub lines_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
    /// Connections purged by the idle reaper
    pub purged_idle: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn line_processed(&self) {
        self.lines_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn idle_purged(&self) {
        self.purged_idle.fetch_add(1, Ordering::Relaxed);
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A worker released a read-lock it does not own
    #[error("read-lock not held by token {token} (owner {owner})")]
    LockNotHeld { token: u64, owner: u64 },

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The connection is already being torn down
    #[error("Connection closed")]
    Closed,
}

/// Identifies a connection in the registry and in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owner-token lock guarding a connection's line processing.
///
/// Zero means unlocked, so tokens must be non-zero.
#[derive(Debug, Default)]
pub struct ReadLock {
    owner: AtomicU64,
}

impl ReadLock {
    pub const UNLOCKED: u64 = 0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the lock for `token`. Returns false if anyone holds it.
    pub fn try_lock(&self, token: u64) -> bool {
        if token == Self::UNLOCKED {
            return false;
        }
        self.owner
            .compare_exchange(Self::UNLOCKED, token, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the lock. Fails without changing anything if `token` is
    /// not the current owner.
    pub fn unlock(&self, token: u64) -> Result<(), ConnectionError> {
        self.owner
            .compare_exchange(token, Self::UNLOCKED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|owner| ConnectionError::LockNotHeld { token, owner })
    }

    pub fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.owner() != Self::UNLOCKED
    }
}

/// One client connection, minus the socket.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    pool: Arc<BufferPool>,

    /// Input buffer and line extraction
    framer: Mutex<LineFramer>,

    /// Complete lines waiting for a worker
    pending: Mutex<VecDeque<PooledBuffer>>,

    /// Signalled when a worker takes a pending line
    input_room: Notify,

    /// Encoded output waiting for the writer task
    output: Mutex<VecDeque<PooledBuffer>>,

    /// Set while the writer holds a popped buffer. Guarded by `output`.
    writing: AtomicBool,

    /// Signalled whenever output is queued or the connection starts closing
    write_interest: Notify,

    /// Updated on every read and write
    last_activity: Mutex<Instant>,

    read_lock: ReadLock,

    state: tokio::sync::Mutex<ProtocolStateMachine>,

    /// Cancelled when the connection must be torn down immediately
    shutdown: CancellationToken,

    /// Set once the connection should close after its output drains
    closing: AtomicBool,

    /// Set once the client has stopped sending
    read_closed: AtomicBool,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, pool: Arc<BufferPool>) -> Self {
        Self {
            id,
            peer,
            framer: Mutex::new(LineFramer::new(Arc::clone(&pool))),
            pool,
            pending: Mutex::new(VecDeque::new()),
            input_room: Notify::new(),
            output: Mutex::new(VecDeque::new()),
            writing: AtomicBool::new(false),
            write_interest: Notify::new(),
            last_activity: Mutex::new(Instant::now()),
            read_lock: ReadLock::new(),
            state: tokio::sync::Mutex::new(ProtocolStateMachine::new(peer)),
            shutdown: CancellationToken::new(),
            closing: AtomicBool::new(false),
            read_closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Frames raw socket bytes and queues the complete lines.
    ///
    /// Returns the number of lines that became available.
    pub fn feed(&self, raw: &[u8]) -> usize {
        self.touch();
        let lines = self.framer.lock().feed(raw);
        let count = lines.len();
        if count > 0 {
            self.pending.lock().extend(lines);
        }
        trace!(conn = %self.id, bytes = raw.len(), lines = count, "Framed input");
        count
    }

    /// Takes the oldest complete line.
    pub fn next_line(&self) -> Option<PooledBuffer> {
        let mut pending = self.pending.lock();
        let line = pending.pop_front();
        if line.is_some() && pending.len() < MAX_PENDING_LINES {
            self.input_room.notify_one();
        }
        line
    }

    pub fn has_pending_lines(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolves once fewer than [`MAX_PENDING_LINES`] lines are waiting.
    pub async fn wait_for_input_room(&self) {
        while self.pending_len() >= MAX_PENDING_LINES {
            self.input_room.notified().await;
        }
    }

    /// Encodes `text` with `charset`, queues it and arms write interest.
    ///
    /// Returns the number of encoded bytes queued.
    pub fn enqueue_output(&self, text: &str, charset: Charset) -> usize {
        if text.is_empty() {
            return 0;
        }
        let buffers = encode(&self.pool, text, charset);
        let bytes = buffers.iter().map(PooledBuffer::len).sum();
        self.output.lock().extend(buffers);
        self.write_interest.notify_one();
        bytes
    }

    /// Takes the next buffer to write.
    pub fn pop_output(&self) -> Option<PooledBuffer> {
        self.output.lock().pop_front()
    }

    /// Takes the next buffer and marks it in flight until
    /// [`finish_write`](Self::finish_write).
    pub fn start_write(&self) -> Option<PooledBuffer> {
        let mut output = self.output.lock();
        let buf = output.pop_front();
        self.writing.store(buf.is_some(), Ordering::Release);
        buf
    }

    /// Recycles a buffer taken by [`start_write`](Self::start_write).
    pub fn finish_write(&self, buf: PooledBuffer) {
        self.writing.store(false, Ordering::Release);
        self.pool.recycle(buf);
    }

    /// True when nothing is queued and no write is in flight.
    pub fn output_is_empty(&self) -> bool {
        let output = self.output.lock();
        output.is_empty() && !self.writing.load(Ordering::Acquire)
    }

    /// Resolves once output is queued or the connection starts closing.
    pub async fn write_ready(&self) {
        self.write_interest.notified().await
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since the last read or write, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn read_lock(&self) -> &ReadLock {
        &self.read_lock
    }

    /// Protocol state. Only the read-lock holder should lock this.
    pub fn state(&self) -> &tokio::sync::Mutex<ProtocolStateMachine> {
        &self.state
    }

    /// Asks the writer to flush what is queued and then close.
    pub fn close_after_flush(&self) {
        self.closing.store(true, Ordering::Release);
        self.write_interest.notify_one();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.shutdown.is_cancelled()
    }

    /// Records that the client will send nothing more.
    pub fn mark_read_closed(&self) {
        self.read_closed.store(true, Ordering::Release);
    }

    pub fn is_read_closed(&self) -> bool {
        self.read_closed.load(Ordering::Acquire)
    }

    /// Tears the connection down without flushing.
    pub fn abort(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Returns every buffer this connection still owns to the pool.
    pub fn release_buffers(&self) {
        self.framer.lock().release();
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        let output: Vec<_> = self.output.lock().drain(..).collect();
        self.pool.recycle_all(pending.into_iter().chain(output));
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("read_lock", &self.read_lock.owner())
            .field("closing", &self.is_closing())
            .field("read_closed", &self.is_read_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        let pool = Arc::new(BufferPool::new(64, 16));
        Connection::new(ConnectionId(1), "127.0.0.1:4000".parse().unwrap(), pool)
    }

    #[test]
    fn test_read_lock_mutual_exclusion() {
        let lock = ReadLock::new();
        assert!(lock.try_lock(7));
        assert!(!lock.try_lock(9));
        assert_eq!(lock.owner(), 7);

        lock.unlock(7).unwrap();
        assert!(!lock.is_locked());
        assert!(lock.try_lock(9));
    }

    #[test]
    fn test_unlock_by_non_owner_fails() {
        let lock = ReadLock::new();
        assert!(matches!(
            lock.unlock(3),
            Err(ConnectionError::LockNotHeld { token: 3, owner: 0 })
        ));

        assert!(lock.try_lock(3));
        assert!(lock.unlock(4).is_err());
        assert_eq!(lock.owner(), 3);
    }

    #[test]
    fn test_zero_token_is_rejected() {
        let lock = ReadLock::new();
        assert!(!lock.try_lock(ReadLock::UNLOCKED));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_read_lock_across_threads() {
        let lock = Arc::new(ReadLock::new());
        let handles: Vec<_> = (1..=8u64)
            .map(|token| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || lock.try_lock(token))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_feed_queues_lines_in_order() {
        let conn = connection();
        assert_eq!(conn.feed(b"GROUP misc.test\r\nQU"), 1);
        assert_eq!(conn.feed(b"IT\r\n"), 1);

        assert_eq!(conn.next_line().unwrap().as_slice(), b"GROUP misc.test\r");
        assert_eq!(conn.next_line().unwrap().as_slice(), b"QUIT\r");
        assert!(!conn.has_pending_lines());
    }

    #[test]
    fn test_output_queue_and_release() {
        let conn = connection();
        let queued = conn.enqueue_output("205 closing connection\r\n", Charset::Utf8);
        assert_eq!(queued, 24);
        assert!(!conn.output_is_empty());

        conn.feed(b"partial");
        conn.release_buffers();
        assert!(conn.output_is_empty());
        assert!(conn.pool().available() >= 2);
    }

    #[test]
    fn test_idle_for() {
        let conn = connection();
        let later = conn.last_activity() + Duration::from_secs(30);
        assert_eq!(conn.idle_for(later), Duration::from_secs(30));
        assert_eq!(conn.idle_for(conn.last_activity()), Duration::ZERO);
    }

    #[test]
    fn test_write_in_flight_counts_as_output() {
        let conn = connection();
        conn.enqueue_output("211 0 1 0 misc.test\r\n", Charset::Utf8);

        let buf = conn.start_write().unwrap();
        assert!(!conn.output_is_empty());
        conn.finish_write(buf);
        assert!(conn.output_is_empty());
        assert!(conn.start_write().is_none());
        assert!(conn.output_is_empty());
    }

    #[tokio::test]
    async fn test_input_room_waits_for_a_line_to_be_taken() {
        let conn = Arc::new(connection());
        conn.feed(&b"DATE\r\n".repeat(MAX_PENDING_LINES));
        assert_eq!(conn.pending_len(), MAX_PENDING_LINES);

        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.wait_for_input_room().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let line = conn.next_line().unwrap();
        conn.pool().recycle(line);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conn.pending_len(), MAX_PENDING_LINES - 1);
    }

    #[test]
    fn test_read_closed_is_not_closing() {
        let conn = connection();
        conn.mark_read_closed();
        assert!(conn.is_read_closed());
        assert!(!conn.is_closing());
    }

    #[tokio::test]
    async fn test_close_after_flush_wakes_writer() {
        let conn = Arc::new(connection());
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.write_ready().await })
        };
        tokio::task::yield_now().await;
        conn.close_after_flush();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(conn.is_closing());
    }
}
