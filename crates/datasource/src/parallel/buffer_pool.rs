//! Reusable chunk buffers for the parallel fetcher.
//!
//! Every in-flight chunk holds one buffer; consumed and abandoned chunks give
//! theirs back, so a steady download allocates at most `max_pooled` buffers
//! plus whatever is in flight.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers allocated fresh.
    pub allocations: u64,
    /// Buffers handed out again from the pool.
    pub reuses: u64,
    /// Buffers currently idle in the pool.
    pub current_pool_size: usize,
    /// Buffers acquired and not yet released.
    pub outstanding: usize,
}

pub struct BufferPool {
    buffer_capacity: usize,
    max_pooled: usize,
    pool: Mutex<Vec<Vec<u8>>>,
    allocations: AtomicU64,
    reuses: AtomicU64,
    outstanding: AtomicUsize,
    /// Once closed, released buffers are dropped instead of pooled.
    closed: AtomicBool,
}

impl BufferPool {
    pub fn new(buffer_capacity: usize, max_pooled: usize) -> Self {
        Self {
            buffer_capacity,
            max_pooled,
            pool: Mutex::new(Vec::with_capacity(max_pooled)),
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Like [`acquire`](Self::acquire), but the buffer finds its way back on drop.
    pub fn checkout(self: &Arc<Self>) -> PooledBuffer {
        PooledBuffer {
            buf: self.acquire(),
            pool: Arc::clone(self),
        }
    }

    /// An empty buffer with room for at least one chunk.
    pub fn acquire(&self) -> Vec<u8> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);

        let mut pool = self.pool.lock();
        if let Some(pos) = pool
            .iter()
            .position(|buf| buf.capacity() >= self.buffer_capacity)
        {
            let buffer = pool.swap_remove(pos);
            self.reuses.fetch_add(1, Ordering::Relaxed);
            return buffer;
        }
        drop(pool);

        self.allocations.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(self.buffer_capacity)
    }

    /// Return a buffer. Dropped when the pool is already full.
    pub fn release(&self, mut buffer: Vec<u8>) {
        // Saturating: a buffer from outside the pool must not wrap the count.
        let _ = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));

        if self.closed.load(Ordering::Acquire) {
            return;
        }
        buffer.clear();
        let mut pool = self.pool.lock();
        if pool.len() < self.max_pooled {
            pool.push(buffer);
        }
    }

    /// Drop every idle buffer.
    pub fn clear(&self) {
        let mut pool = self.pool.lock();
        if !pool.is_empty() {
            debug!(released = pool.len(), "Clearing buffer pool");
        }
        pool.clear();
        pool.shrink_to_fit();
    }

    /// Empty the pool and stop retaining buffers released from now on.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.clear();
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            current_pool_size: self.pool.lock().len(),
            outstanding: self.outstanding.load(Ordering::Relaxed),
        }
    }
}

/// A pool buffer returned on drop, whether its chunk was consumed, abandoned
/// or its download aborted.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
