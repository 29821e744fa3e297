//! Random-access reads into Snappy/S2 framed streams held in memory
//!
//! Given a compressed stream and a byte range in the uncompressed
//! coordinate space, this crate returns the corresponding plaintext while
//! decompressing only the chunks that cover the request. Decompressed
//! blocks are cached: blocks referenced by outstanding reads live in a
//! per-stream active set, idle blocks in a process-wide LRU shared by all
//! streams. Buffers come from a pluggable [`Allocator`]; the
//! [`SizeClassedAllocator`] reuses power-of-two-capacity buffers across
//! reads.
//!
//! ```no_run
//! use s2seek::Seeker;
//!
//! # fn main() -> s2seek::Result<()> {
//! # let compressed: Vec<u8> = Vec::new();
//! let seeker = Seeker::builder(&compressed).allow_build_index().build()?;
//! let view = seeker.read(1024, 64)?;
//! assert_eq!(view.len(), 64);
//! // The view is released when the guard drops.
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod cache;
pub mod error;
pub mod frame;
pub mod index;
pub mod seeker;

pub use allocator::{
    Allocator, DefaultAllocator, PoolConfig, PoolStats, SizeClassedAllocator, LARGEST_CLASS,
    POOL_CLASS_COUNT, SKIP_CLASSES,
};
pub use cache::{
    cache_stats, purge_global_cache, set_global_lru_capacity, CacheStats, DEFAULT_LRU_CAPACITY,
};
pub use error::{Error, Result};
pub use index::{Index, IndexEntry};
pub use seeker::{ReadGuard, Seeker, SeekerBuilder};
