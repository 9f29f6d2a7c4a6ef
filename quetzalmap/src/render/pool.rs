//! Reusable chunk-sized pixel buffers.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::world::CHUNK_COLUMNS;

/// Pool of 16×16 pixel scratch buffers.
///
/// Acquire and release are lock-free. When the pool is empty a new buffer is
/// allocated instead of waiting; when it is full a released buffer is dropped.
pub struct PixelBufferPool {
    queue: ArrayQueue<Vec<u32>>,
    fallback_allocations: AtomicU64,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub available: usize,
    pub capacity: usize,
    /// Acquires that found the pool empty and allocated.
    pub fallback_allocations: u64,
}

impl PoolStats {
    pub fn is_exhausted(&self) -> bool {
        self.available == 0
    }

    /// Bytes held by a full pool.
    pub fn memory_bytes(&self) -> usize {
        self.capacity * CHUNK_COLUMNS * std::mem::size_of::<u32>()
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool {}/{} available, {} fallback allocations",
            self.available, self.capacity, self.fallback_allocations
        )
    }
}

impl PixelBufferPool {
    /// Creates a pool pre-filled with `capacity` buffers.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let queue = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = queue.push(vec![0; CHUNK_COLUMNS]);
        }
        Self {
            queue,
            fallback_allocations: AtomicU64::new(0),
        }
    }

    /// Takes a zeroed buffer. Never blocks.
    pub fn acquire(&self) -> PooledPixels<'_> {
        let buffer = self.queue.pop().unwrap_or_else(|| {
            self.fallback_allocations.fetch_add(1, Ordering::Relaxed);
            vec![0; CHUNK_COLUMNS]
        });
        PooledPixels {
            pool: self,
            buffer: Some(buffer),
        }
    }

    /// Clears a buffer and returns it to the pool if there is room.
    pub fn release(&self, mut buffer: Vec<u32>) {
        if buffer.len() != CHUNK_COLUMNS {
            return;
        }
        buffer.fill(0);
        let _ = self.queue.push(buffer);
    }

    pub fn available(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.available(),
            capacity: self.capacity(),
            fallback_allocations: self.fallback_allocations.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for PixelBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// A buffer on loan from a [`PixelBufferPool`], returned when dropped.
pub struct PooledPixels<'a> {
    pool: &'a PixelBufferPool,
    buffer: Option<Vec<u32>>,
}

impl Deref for PooledPixels<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledPixels<'_> {
    fn deref_mut(&mut self) -> &mut [u32] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledPixels<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_pool_is_full() {
        let pool = PixelBufferPool::new(4);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.capacity(), 4);
        assert!(!pool.stats().is_exhausted());
    }

    #[test]
    fn test_guard_returns_cleared_buffer() {
        let pool = PixelBufferPool::new(1);
        {
            let mut pixels = pool.acquire();
            assert_eq!(pool.available(), 0);
            pixels.fill(0xFFFF_FFFF);
        }
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_exhausted_pool_allocates() {
        let pool = PixelBufferPool::new(1);
        let first = pool.acquire();
        let second = pool.acquire();
        assert_eq!(second.len(), CHUNK_COLUMNS);
        assert!(pool.stats().is_exhausted());
        assert_eq!(pool.stats().fallback_allocations, 1);

        drop(first);
        drop(second);
        // Excess release is dropped
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_release_on_panic() {
        let pool = Arc::new(PixelBufferPool::new(2));
        let worker = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let _pixels = pool.acquire();
                panic!("render failed");
            })
        };
        assert!(worker.join().is_err());
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_wrong_sized_release_ignored() {
        let pool = PixelBufferPool::new(2);
        let _held = pool.acquire();
        pool.release(vec![0; 3]);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_stats_display() {
        let pool = PixelBufferPool::new(3);
        assert_eq!(
            pool.stats().to_string(),
            "pool 3/3 available, 0 fallback allocations"
        );
        assert_eq!(pool.stats().memory_bytes(), 3 * 256 * 4);
    }
}
