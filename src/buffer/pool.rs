//! Recycled buffer allocations
//!
//! Storage released by a [`Buffer`](super::Buffer) is parked in a lock-free
//! queue and handed back out by `alloc_unsafe`. Recycled storage is not
//! cleared, which is why `alloc_unsafe` contents are unspecified until
//! written. The memory is always initialised from Rust's point of view.

use crossbeam::queue::ArrayQueue;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::BufferConfig;
use crate::runtime;

static POOL: Lazy<AllocationPool> = Lazy::new(|| {
    let config = runtime::try_current()
        .map(|rt| rt.config().buffer.clone())
        .unwrap_or_default();
    AllocationPool::new(&config)
});

/// Process-wide allocation pool
pub fn global() -> &'static AllocationPool {
    &POOL
}

/// Bounded queue of released allocations
pub struct AllocationPool {
    free: Option<ArrayQueue<Vec<u8>>>,
    max_bytes: usize,
    reused: AtomicUsize,
}

impl AllocationPool {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            // ArrayQueue rejects a zero capacity
            free: (config.pool_slots > 0).then(|| ArrayQueue::new(config.pool_slots)),
            max_bytes: config.pool_max_bytes,
            reused: AtomicUsize::new(0),
        }
    }

    /// Storage of exactly `size` bytes. Contents are unspecified when the
    /// storage was recycled.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        let Some(queue) = &self.free else {
            return vec![0; size];
        };
        match queue.pop() {
            Some(mut storage) if storage.capacity() >= size => {
                if storage.len() >= size {
                    storage.truncate(size);
                } else {
                    storage.resize(size, 0);
                }
                self.reused.fetch_add(1, Ordering::Relaxed);
                storage
            }
            Some(too_small) => {
                // Keep it for a smaller request
                let _ = queue.push(too_small);
                vec![0; size]
            }
            None => vec![0; size],
        }
    }

    /// Park storage for reuse. Large or empty allocations are simply freed.
    pub fn release(&self, storage: Vec<u8>) {
        if storage.capacity() == 0 || storage.capacity() > self.max_bytes {
            return;
        }
        if let Some(queue) = &self.free {
            let _ = queue.push(storage);
        }
    }

    /// Allocations currently parked
    pub fn available(&self) -> usize {
        self.free.as_ref().map_or(0, |q| q.len())
    }

    /// Number of acquisitions served from recycled storage
    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> AllocationPool {
        AllocationPool::new(&BufferConfig {
            pool_slots: 2,
            pool_max_bytes: 1024,
        })
    }

    #[test]
    fn test_acquire_exact_length() {
        let pool = small_pool();
        assert_eq!(pool.acquire(100).len(), 100);
        assert_eq!(pool.acquire(0).len(), 0);
    }

    #[test]
    fn test_release_and_reuse() {
        let pool = small_pool();
        pool.release(vec![7u8; 64]);
        assert_eq!(pool.available(), 1);

        let storage = pool.acquire(32);
        assert_eq!(storage.len(), 32);
        assert_eq!(pool.reused(), 1);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_small_storage_kept_for_later() {
        let pool = small_pool();
        pool.release(vec![1u8; 16]);

        assert_eq!(pool.acquire(512).len(), 512);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.reused(), 0);

        assert_eq!(pool.acquire(8).len(), 8);
        assert_eq!(pool.reused(), 1);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_oversized_not_pooled() {
        let pool = small_pool();
        pool.release(vec![0u8; 4096]);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = small_pool();
        for _ in 0..5 {
            pool.release(vec![0u8; 16]);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_zero_slots() {
        let pool = AllocationPool::new(&BufferConfig {
            pool_slots: 0,
            pool_max_bytes: 1024,
        });
        pool.release(vec![0u8; 16]);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.acquire(8), vec![0u8; 8]);
    }
}
