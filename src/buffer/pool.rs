//! Fixed-capacity buffer pool.
//!
//! Every buffer handed out by [`BufferPool::acquire`] has the same capacity
//! (one protocol line by default). Buffers are returned with
//! [`BufferPool::recycle`], which resets them and keeps up to `max_idle` of
//! them on a free list for reuse.
//!
//! Ownership is the aliasing guard: `acquire` moves a buffer out of the free
//! list and `recycle` moves it back in, so two live owners can never share
//! the same backing storage.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default buffer capacity: one protocol line.
pub const DEFAULT_BUFFER_CAPACITY: usize = 512;

/// Smallest capacity the pool will create. The line framer needs room for
/// the padding byte plus at least one payload byte.
const MIN_BUFFER_CAPACITY: usize = 16;

/// A fixed-capacity byte buffer owned by exactly one context at a time.
///
/// Bytes are appended at the tail with [`put`](Self::put) and consumed from
/// the head with [`advance`](Self::advance). The readable region is
/// `as_slice()`.
#[derive(Debug)]
pub struct PooledBuffer {
    data: BytesMut,
    pos: usize,
    capacity: usize,
}

impl PooledBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            pos: 0,
            capacity,
        }
    }

    /// Fixed capacity of this buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no more bytes can be appended.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Room left at the tail.
    #[inline]
    pub fn spare(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Appends as many bytes from `src` as fit and returns how many were
    /// written.
    pub fn put(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.spare());
        self.data.extend_from_slice(&src[..n]);
        n
    }

    /// The unread bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Marks `n` bytes as consumed.
    ///
    /// # Panics
    /// Panics if `n` exceeds the unread length.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.len(), "advance past end of buffer");
        self.pos += n;
    }

    /// Moves the unread bytes to the front so the tail regains the consumed
    /// space.
    pub fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        let unread = self.len();
        self.data.copy_within(self.pos.., 0);
        self.data.truncate(unread);
        self.pos = 0;
    }

    fn reset(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    #[cfg(test)]
    pub(crate) fn storage_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers created because the free list was empty
    pub allocated: u64,
    /// Acquisitions served from the free list
    pub reused: u64,
    /// Buffers returned through `recycle`
    pub recycled: u64,
    /// Buffers currently idle on the free list
    pub available: usize,
}

/// Shared pool of fixed-capacity buffers.
///
/// The free list is the only mutable state shared between connections in
/// the I/O core, so it sits behind its own lock.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<PooledBuffer>>,
    buffer_capacity: usize,
    max_idle: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
    recycled: AtomicU64,
}

impl BufferPool {
    /// Creates a pool of `buffer_capacity`-byte buffers that keeps at most
    /// `max_idle` recycled buffers around.
    pub fn new(buffer_capacity: usize, max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle.min(1024))),
            buffer_capacity: buffer_capacity.max(MIN_BUFFER_CAPACITY),
            max_idle,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        }
    }

    /// Capacity of every buffer this pool hands out.
    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Returns an empty buffer, preferring a recycled one.
    pub fn acquire(&self) -> PooledBuffer {
        if let Some(buf) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return buf;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        PooledBuffer::new(self.buffer_capacity)
    }

    /// Takes back a buffer whose contents are no longer needed.
    ///
    /// The buffer is reset before it becomes available again. Buffers beyond
    /// `max_idle` are dropped.
    pub fn recycle(&self, mut buf: PooledBuffer) {
        self.recycled.fetch_add(1, Ordering::Relaxed);
        if buf.capacity != self.buffer_capacity {
            return;
        }
        buf.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(buf);
        }
    }

    /// Recycles every buffer produced by `bufs`.
    pub fn recycle_all(&self, bufs: impl IntoIterator<Item = PooledBuffer>) {
        for buf in bufs {
            self.recycle(buf);
        }
    }

    /// Number of idle buffers on the free list.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            available: self.available(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_returns_empty_buffer() {
        let pool = BufferPool::new(64, 8);
        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.spare(), 64);
    }

    #[test]
    fn test_put_respects_capacity() {
        let pool = BufferPool::new(16, 8);
        let mut buf = pool.acquire();
        let written = buf.put(&[b'x'; 20]);
        assert_eq!(written, 16);
        assert!(buf.is_full());
        assert_eq!(buf.put(b"more"), 0);
    }

    #[test]
    fn test_advance_and_compact() {
        let pool = BufferPool::new(16, 8);
        let mut buf = pool.acquire();
        buf.put(b"hello world");
        buf.advance(6);
        assert_eq!(buf.as_slice(), b"world");
        buf.compact();
        assert_eq!(buf.as_slice(), b"world");
        assert_eq!(buf.spare(), 11);
    }

    #[test]
    fn test_recycled_buffer_is_reused_and_reset() {
        let pool = BufferPool::new(32, 8);
        let mut buf = pool.acquire();
        buf.put(b"stale data");
        let ptr = buf.storage_ptr();
        pool.recycle(buf);

        assert_eq!(pool.available(), 1);
        let again = pool.acquire();
        assert!(again.is_empty());
        assert_eq!(again.storage_ptr(), ptr);

        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.recycled, 1);
    }

    #[test]
    fn test_recycle_never_aliases_a_live_buffer() {
        let pool = BufferPool::new(32, 8);
        let a = pool.acquire();
        let b = pool.acquire();
        let b_ptr = b.storage_ptr();

        pool.recycle(a);
        let c = pool.acquire();
        let d = pool.acquire();

        // b is still live, so neither later acquisition may share its storage
        assert_ne!(c.storage_ptr(), b_ptr);
        assert_ne!(d.storage_ptr(), b_ptr);
        assert_ne!(c.storage_ptr(), d.storage_ptr());
    }

    #[test]
    fn test_max_idle_bounds_free_list() {
        let pool = BufferPool::new(32, 2);
        let bufs: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        pool.recycle_all(bufs);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.stats().recycled, 5);
    }

    #[test]
    fn test_tiny_capacity_is_clamped() {
        let pool = BufferPool::new(1, 2);
        assert_eq!(pool.buffer_capacity(), MIN_BUFFER_CAPACITY);
    }
}
