//! Buffer allocation for decompressed blocks and assembly buffers
//!
//! Provides a pluggable [`Allocator`] seam plus a size-classed pooling
//! implementation that reuses power-of-two-capacity buffers to reduce
//! allocation churn during repeated block decompression.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Buffer source used for decompressed blocks and read assembly.
///
/// `alloc(n)` hands out a buffer with `len() == n` (capacity may exceed it);
/// `free` takes ownership back. `free` must accept any buffer a prior
/// `alloc` returned, in any order.
pub trait Allocator: Send + Sync {
    /// Allocate a buffer of exactly `n` bytes.
    fn alloc(&self, n: usize) -> Vec<u8>;

    /// Release a buffer previously returned by `alloc`.
    fn free(&self, buf: Vec<u8>);
}

/// Allocator that defers to the global heap.
///
/// `alloc` returns a fresh zero-initialized buffer and `free` simply drops.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAllocator;

impl Allocator for DefaultAllocator {
    fn alloc(&self, n: usize) -> Vec<u8> {
        vec![0u8; n]
    }

    fn free(&self, _buf: Vec<u8>) {}
}

/// Smallest pooled size class. Requests of at most `2^(SKIP_CLASSES - 1)`
/// bytes bypass the pools.
pub const SKIP_CLASSES: u32 = 6;

/// One past the largest pooled size class.
pub const LARGEST_CLASS: u32 = 33;

/// Number of size-class pools.
pub const POOL_CLASS_COUNT: usize = (LARGEST_CLASS - SKIP_CLASSES) as usize;

/// Configuration for [`SizeClassedAllocator`]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle buffers retained per size class.
    pub max_buffers_per_class: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_buffers_per_class: 32,
        }
    }
}

/// Pooling allocator with one pool per power-of-two size class.
///
/// Class `k` holds buffers of capacity `2^k`, for `k` in
/// `SKIP_CLASSES..LARGEST_CLASS`. Requests outside that range fall through
/// to the heap. Pools are bounded and may discard buffers at any time.
pub struct SizeClassedAllocator {
    pools: [Mutex<VecDeque<Vec<u8>>>; POOL_CLASS_COUNT],
    config: PoolConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Size class an allocation of `n` bytes is served from: the smallest class
/// whose capacity holds `n`.
fn alloc_class(n: usize) -> Option<u32> {
    if n <= 1 {
        return None;
    }
    let class = usize::BITS - (n - 1).leading_zeros();
    (SKIP_CLASSES..LARGEST_CLASS).contains(&class).then_some(class)
}

/// Size class a buffer of capacity `cap` is returned to: the largest class
/// whose capacity fits within `cap`.
fn capacity_class(cap: usize) -> Option<u32> {
    if cap == 0 {
        return None;
    }
    let class = usize::BITS - 1 - cap.leading_zeros();
    (SKIP_CLASSES..LARGEST_CLASS).contains(&class).then_some(class)
}

impl SizeClassedAllocator {
    /// Create a pooling allocator with default configuration.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pooling allocator with custom configuration.
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            pools: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Drop all pooled buffers.
    pub fn clear(&self) {
        for pool in &self.pools {
            if let Ok(mut pool) = pool.lock() {
                pool.clear();
            }
        }
    }

    /// Snapshot of pool occupancy and hit counters.
    pub fn stats(&self) -> PoolStats {
        let mut buffers_per_class = [0usize; POOL_CLASS_COUNT];
        for (slot, pool) in buffers_per_class.iter_mut().zip(&self.pools) {
            *slot = pool.lock().map(|p| p.len()).unwrap_or(0);
        }
        PoolStats {
            buffers_per_class,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for SizeClassedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SizeClassedAllocator {
    fn alloc(&self, n: usize) -> Vec<u8> {
        let Some(class) = alloc_class(n) else {
            return vec![0u8; n];
        };
        let pool = &self.pools[(class - SKIP_CLASSES) as usize];
        loop {
            let candidate = match pool.lock() {
                Ok(mut pool) => pool.pop_front(),
                Err(_) => None,
            };
            match candidate {
                Some(mut buf) if buf.capacity() >= n => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    buf.resize(n, 0);
                    return buf;
                }
                // Undersized entry for this class. Drop it and probe again.
                Some(_) => continue,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let mut buf = Vec::with_capacity(1usize << class);
                    buf.resize(n, 0);
                    return buf;
                }
            }
        }
    }

    fn free(&self, buf: Vec<u8>) {
        let Some(class) = capacity_class(buf.capacity()) else {
            return;
        };
        if let Ok(mut pool) = self.pools[(class - SKIP_CLASSES) as usize].lock() {
            if pool.len() < self.config.max_buffers_per_class {
                pool.push_back(buf);
            }
        }
    }
}

/// Occupancy and hit counters for a [`SizeClassedAllocator`]
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Idle buffers currently retained, indexed from `SKIP_CLASSES`.
    pub buffers_per_class: [usize; POOL_CLASS_COUNT],
    /// Allocations served from a pool.
    pub hits: u64,
    /// Allocations that fell through to the heap.
    pub misses: u64,
}

impl PoolStats {
    /// Total number of idle buffers across all classes.
    pub fn total_buffers(&self) -> usize {
        self.buffers_per_class.iter().sum()
    }

    /// Fraction of pool-eligible allocations served from a pool.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// A buffer owned by an allocator, returned to it on drop.
pub(crate) struct OwnedBuf {
    buf: Option<Vec<u8>>,
    allocator: Arc<dyn Allocator>,
}

impl OwnedBuf {
    /// Allocate `n` bytes from `allocator`.
    pub(crate) fn new(allocator: &Arc<dyn Allocator>, n: usize) -> Self {
        Self {
            buf: Some(allocator.alloc(n)),
            allocator: Arc::clone(allocator),
        }
    }

    /// Wrap a buffer already obtained from `allocator`.
    pub(crate) fn from_vec(buf: Vec<u8>, allocator: &Arc<dyn Allocator>) -> Self {
        Self {
            buf: Some(buf),
            allocator: Arc::clone(allocator),
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub(crate) fn clear(&mut self) {
        if let Some(buf) = &mut self.buf {
            buf.clear();
        }
    }

    pub(crate) fn extend_from_slice(&mut self, src: &[u8]) {
        if let Some(buf) = &mut self.buf {
            buf.extend_from_slice(src);
        }
    }
}

impl Drop for OwnedBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.allocator.free(buf);
        }
    }
}
