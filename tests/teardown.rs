//! Stream teardown removes its blocks from the global cache
//!
//! Runs as its own binary so the global entry counts below see only this
//! test's blocks.

mod util;

use s2seek::{cache_stats, Seeker};
use util::*;

#[test]
fn test_teardown_clears_global_cache() {
    const CHUNK: usize = 65536;
    let plain = corpus(4 * CHUNK);
    let data = encode_indexed(&plain);

    let seeker = Seeker::new(&data).unwrap();
    for i in 0..4 {
        seeker.read((i * CHUNK) as u64, 256).unwrap();
    }
    assert_eq!(seeker.active_blocks(), 0);
    assert_eq!(seeker.cached_blocks(), 4);
    assert_eq!(cache_stats().entries, 4);

    drop(seeker);
    assert_eq!(cache_stats().entries, 0);
}
