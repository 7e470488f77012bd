//! Byte buffer pool.
//!
//! Buffers are grouped by size. [`BufferPool::acquire`] hands out a
//! [`PooledBuffer`] guard that owns its buffer exclusively and puts it back
//! on drop, so a buffer is never shared by two in-flight operations.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use super::constants::DEFAULT_POOL_CAPACITY;

#[derive(Debug)]
struct PoolInner {
    free: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
    capacity: usize,
}

/// A free list of byte buffers keyed by size.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl BufferPool {
    /// Create a pool that retains at most `capacity` idle buffers per size.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(HashMap::new()),
                capacity,
            }),
        }
    }

    /// Take a zeroed buffer of exactly `size` bytes.
    pub fn acquire(&self, size: usize) -> PooledBuffer {
        let recycled = self
            .inner
            .free
            .lock()
            .get_mut(&size)
            .and_then(|list| list.pop());

        let mut buffer = recycled.unwrap_or_else(|| Vec::with_capacity(size));
        buffer.clear();
        buffer.resize(size, 0);

        PooledBuffer {
            buffer,
            size,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle buffers held for `size`.
    pub fn idle(&self, size: usize) -> usize {
        self.inner.free.lock().get(&size).map_or(0, Vec::len)
    }
}

/// Exclusive handle on a pooled buffer; returned to the pool on drop.
pub struct PooledBuffer {
    buffer: Vec<u8>,
    size: usize,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// The size class this buffer was acquired for.
    pub fn size_class(&self) -> usize {
        self.size
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("size_class", &self.size)
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        let mut free = self.pool.free.lock();
        let list = free.entry(self.size).or_default();
        if list.len() < self.pool.capacity {
            list.push(buffer);
        }
    }
}
