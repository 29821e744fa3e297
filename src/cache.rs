//! Decompressed-block cache
//!
//! Each stream tracks its in-use blocks in an active set; a block is in the
//! set exactly while at least one read guard references it. When the last
//! guard drops, the block moves to a process-wide LRU of idle blocks shared
//! by all streams, where it stays until reused, evicted, or its stream is
//! torn down. Buffers travel back to the allocator that produced them when
//! the last reference to a block goes away.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::trace;

use crate::allocator::{Allocator, OwnedBuf};
use crate::error::Result;

/// Default capacity of the process-wide idle-block cache.
pub const DEFAULT_LRU_CAPACITY: usize = 100;

/// Identity of an idle block: the stream it belongs to and the offset of
/// its compressed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockKey {
    seeker: u64,
    offset: u64,
}

struct GlobalCache {
    lru: Mutex<LruCache<BlockKey, Arc<OwnedBuf>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

static GLOBAL_CACHE: OnceLock<GlobalCache> = OnceLock::new();

fn global() -> &'static GlobalCache {
    GLOBAL_CACHE.get_or_init(|| GlobalCache {
        lru: Mutex::new(LruCache::new(lru_capacity(DEFAULT_LRU_CAPACITY))),
        hits: AtomicU64::new(0),
        misses: AtomicU64::new(0),
    })
}

fn lru_capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n.max(1)).unwrap_or(NonZeroUsize::MIN)
}

/// Resize the process-wide idle-block cache.
///
/// Shrinking evicts the least recently used blocks and releases their
/// buffers. Safe to call concurrently with reads.
pub fn set_global_lru_capacity(n: usize) {
    global().lru.lock().resize(lru_capacity(n));
}

/// Drop every idle block in the process-wide cache, releasing all buffers.
///
/// Safe to call concurrently with reads; in-use blocks are unaffected.
pub fn purge_global_cache() {
    global().lru.lock().clear();
}

/// Counters for the process-wide idle-block cache
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Idle blocks currently resident.
    pub entries: usize,
    /// Maximum number of resident idle blocks.
    pub capacity: usize,
    /// Block requests served without decompression, from the active set or
    /// the idle cache.
    pub hits: u64,
    /// Block requests that decompressed a chunk.
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of block requests served without decompression.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Snapshot of the process-wide cache counters.
pub fn cache_stats() -> CacheStats {
    let cache = global();
    let lru = cache.lru.lock();
    CacheStats {
        entries: lru.len(),
        capacity: lru.cap().get(),
        hits: cache.hits.load(Ordering::Relaxed),
        misses: cache.misses.load(Ordering::Relaxed),
    }
}

struct ActiveBlock {
    data: Arc<OwnedBuf>,
    refs: usize,
}

#[derive(Default)]
struct ActiveSet {
    blocks: HashMap<u64, ActiveBlock>,
    dying: bool,
}

/// Cache state of one stream, shared between its seeker and the read guards
/// it hands out.
pub(crate) struct SeekerShared {
    id: u64,
    allocator: Arc<dyn Allocator>,
    state: Mutex<ActiveSet>,
}

static NEXT_SEEKER_ID: AtomicU64 = AtomicU64::new(0);

impl SeekerShared {
    pub(crate) fn new(allocator: Arc<dyn Allocator>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SEEKER_ID.fetch_add(1, Ordering::Relaxed),
            allocator,
            state: Mutex::new(ActiveSet::default()),
        })
    }

    pub(crate) fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Number of blocks currently referenced by outstanding read guards.
    pub(crate) fn active_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Number of this stream's idle blocks resident in the global cache.
    pub(crate) fn resident_count(&self) -> usize {
        global()
            .lru
            .lock()
            .iter()
            .filter(|(key, _)| key.seeker == self.id)
            .count()
    }
}

/// Mark the stream as dying and remove its idle blocks from the global
/// cache. Outstanding guards release their buffers directly afterwards.
pub(crate) fn detach_seeker(shared: &SeekerShared) {
    shared.state.lock().dying = true;
    let mut lru = global().lru.lock();
    let keys: Vec<BlockKey> = lru
        .iter()
        .map(|(key, _)| *key)
        .filter(|key| key.seeker == shared.id)
        .collect();
    for key in keys {
        lru.pop(&key);
    }
}

/// Reference to a cached decompressed block.
///
/// The plaintext stays valid for the guard's lifetime; dropping the guard
/// releases the reference and may move the block to the idle cache.
pub(crate) struct BlockGuard {
    shared: Arc<SeekerShared>,
    offset: u64,
    data: Arc<OwnedBuf>,
}

impl std::fmt::Debug for BlockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockGuard")
            .field("offset", &self.offset)
            .field("len", &self.data.as_slice().len())
            .finish()
    }
}

impl BlockGuard {
    pub(crate) fn bytes(&self) -> &[u8] {
        self.data.as_slice()
    }
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.blocks.get_mut(&self.offset) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }
        let Some(entry) = state.blocks.remove(&self.offset) else {
            return;
        };
        if state.dying {
            // Dropping the last references frees the buffer.
            return;
        }
        let key = BlockKey {
            seeker: self.shared.id,
            offset: self.offset,
        };
        let mut lru = global().lru.lock();
        if !lru.contains(&key) {
            // May evict the least recently used idle block, dropping its
            // buffer back to its allocator.
            lru.push(key, entry.data);
        }
        // Already resident: this block lost a decompression race earlier;
        // the resident one is authoritative and this copy is dropped.
    }
}

/// Get the plaintext of the compressed chunk body at `offset`, decompressing
/// it unless a live or idle block already holds it.
///
/// `compressed` is the chunk body with the checksum stripped and
/// `uncompressed_len` its decoded size as reported by the codec.
pub(crate) fn get_block(
    shared: &Arc<SeekerShared>,
    compressed: &[u8],
    offset: u64,
    uncompressed_len: usize,
) -> Result<BlockGuard> {
    let cache = global();
    {
        let mut state = shared.state.lock();
        if let Some(entry) = state.blocks.get_mut(&offset) {
            entry.refs += 1;
            cache.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(BlockGuard {
                shared: Arc::clone(shared),
                offset,
                data: Arc::clone(&entry.data),
            });
        }
        let key = BlockKey {
            seeker: shared.id,
            offset,
        };
        if let Some(data) = cache.lru.lock().pop(&key) {
            cache.hits.fetch_add(1, Ordering::Relaxed);
            trace!("reactivated idle block at offset {offset}");
            state.blocks.insert(
                offset,
                ActiveBlock {
                    data: Arc::clone(&data),
                    refs: 1,
                },
            );
            return Ok(BlockGuard {
                shared: Arc::clone(shared),
                offset,
                data,
            });
        }
    }

    // Decompress without holding the stream lock so a slow decode does not
    // stall other readers. Two readers may decode the same chunk; the
    // second to re-acquire the lock defers to the first.
    cache.misses.fetch_add(1, Ordering::Relaxed);
    trace!("decompressing {} byte chunk at offset {offset}", compressed.len());
    let mut buf = shared.allocator.alloc(uncompressed_len);
    match snap::raw::Decoder::new().decompress(compressed, &mut buf) {
        Ok(n) => debug_assert_eq!(n, uncompressed_len),
        Err(err) => {
            shared.allocator.free(buf);
            return Err(err.into());
        }
    }
    let fresh = Arc::new(OwnedBuf::from_vec(buf, &shared.allocator));

    let mut state = shared.state.lock();
    if let Some(entry) = state.blocks.get_mut(&offset) {
        // Lost the race; the fresh buffer goes back to the allocator.
        entry.refs += 1;
        return Ok(BlockGuard {
            shared: Arc::clone(shared),
            offset,
            data: Arc::clone(&entry.data),
        });
    }
    let key = BlockKey {
        seeker: shared.id,
        offset,
    };
    if let Some(data) = cache.lru.lock().pop(&key) {
        state.blocks.insert(
            offset,
            ActiveBlock {
                data: Arc::clone(&data),
                refs: 1,
            },
        );
        return Ok(BlockGuard {
            shared: Arc::clone(shared),
            offset,
            data,
        });
    }
    state.blocks.insert(
        offset,
        ActiveBlock {
            data: Arc::clone(&fresh),
            refs: 1,
        },
    );
    Ok(BlockGuard {
        shared: Arc::clone(shared),
        offset,
        data: fresh,
    })
}
