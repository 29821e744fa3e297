//! Seek index over a framed stream
//!
//! The index maps uncompressed offsets to the chunk boundaries where
//! parsing may resume. It can be supplied by the caller, loaded from a
//! trailing skippable index chunk, or built by a single pass over the
//! stream.
//!
//! The serialized form is a skippable chunk (type [`frame::CHUNK_INDEX`])
//! whose body ends with a fixed-size locator tail, so a reader can find the
//! chunk from the end of the stream without walking it:
//!
//! ```text
//! "s2idx\0" | u32 entries | u64 total_uncompressed | u64 total_compressed
//!   | entries * (u64 uncompressed_offset, u64 compressed_offset)
//!   | u32 total chunk length | "\0xdi2s"
//! ```
//!
//! All fields little-endian.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame;

const INDEX_MAGIC: &[u8; 6] = b"s2idx\0";
const INDEX_TRAILER_MAGIC: &[u8; 6] = b"\0xdi2s";

/// Locator tail: total chunk length plus the reversed magic.
const TAIL_SIZE: usize = 4 + INDEX_TRAILER_MAGIC.len();

/// A single checkpoint: a chunk header position and the uncompressed offset
/// the chunk starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Offset of the chunk's first plaintext byte in the uncompressed stream.
    pub uncompressed_offset: u64,
    /// Offset of the chunk header in the compressed stream.
    pub compressed_offset: u64,
}

/// Mapping from uncompressed offsets to compressed chunk boundaries
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: Vec<IndexEntry>,
    total_uncompressed: u64,
    total_compressed: u64,
}

impl Index {
    /// Create an index from checkpoints the caller already holds.
    ///
    /// `entries` must be sorted by uncompressed offset.
    pub fn from_entries(
        entries: Vec<IndexEntry>,
        total_uncompressed: u64,
        total_compressed: u64,
    ) -> Self {
        Self {
            entries,
            total_uncompressed,
            total_compressed,
        }
    }

    /// Build an index by walking every chunk of `data`.
    pub fn build(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut uncompressed = 0u64;
        let mut offset = 0u64;

        while let Some(chunk) = frame::parse_chunk(data, offset) {
            match chunk.kind {
                frame::CHUNK_COMPRESSED_DATA => {
                    let decoded_len = snap::raw::decompress_len(chunk.payload())? as u64;
                    entries.push(IndexEntry {
                        uncompressed_offset: uncompressed,
                        compressed_offset: offset,
                    });
                    uncompressed += decoded_len;
                }
                frame::CHUNK_UNCOMPRESSED_DATA => {
                    let decoded_len = chunk.payload().len() as u64;
                    entries.push(IndexEntry {
                        uncompressed_offset: uncompressed,
                        compressed_offset: offset,
                    });
                    uncompressed += decoded_len;
                }
                kind if kind <= frame::MAX_UNSKIPPABLE_CHUNK => {
                    return Err(Error::UnsupportedChunk {
                        chunk_type: kind,
                        offset,
                    });
                }
                _ => {}
            }
            offset = chunk.next;
        }

        debug!(
            "built stream index: {} entries covering {} uncompressed bytes",
            entries.len(),
            uncompressed
        );

        Ok(Self {
            entries,
            total_uncompressed: uncompressed,
            total_compressed: offset,
        })
    }

    /// Load the index from a trailing index chunk.
    ///
    /// Returns [`Error::IndexMissing`] when the stream does not end in an
    /// index chunk, and [`Error::InvalidIndex`] when one is present but
    /// malformed.
    pub fn load_stream(data: &[u8]) -> Result<Self> {
        if data.len() < frame::HEADER_SIZE + TAIL_SIZE {
            return Err(Error::IndexMissing);
        }
        let tail = &data[data.len() - TAIL_SIZE..];
        if &tail[4..] != INDEX_TRAILER_MAGIC {
            return Err(Error::IndexMissing);
        }

        let chunk_len = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;
        if chunk_len > data.len() || chunk_len < frame::HEADER_SIZE + TAIL_SIZE {
            return Err(Error::InvalidIndex("chunk length does not fit the stream"));
        }
        let start = (data.len() - chunk_len) as u64;
        let chunk = frame::parse_chunk(data, start)
            .ok_or(Error::InvalidIndex("chunk header does not match its tail"))?;
        if chunk.kind != frame::CHUNK_INDEX {
            return Err(Error::InvalidIndex("trailing chunk is not an index chunk"));
        }

        Self::parse_body(chunk.body)
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        let truncated = |_| Error::InvalidIndex("truncated index chunk");
        let mut r = body;

        let mut magic = [0u8; 6];
        r.read_exact(&mut magic).map_err(truncated)?;
        if &magic != INDEX_MAGIC {
            return Err(Error::InvalidIndex("bad index magic"));
        }

        let count = r.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let total_uncompressed = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let total_compressed = r.read_u64::<LittleEndian>().map_err(truncated)?;

        if r.len() < count.saturating_mul(16) {
            return Err(Error::InvalidIndex("entry table overruns chunk"));
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let uncompressed_offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
            let compressed_offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
            entries.push(IndexEntry {
                uncompressed_offset,
                compressed_offset,
            });
        }
        if entries
            .windows(2)
            .any(|w| w[0].uncompressed_offset > w[1].uncompressed_offset)
        {
            return Err(Error::InvalidIndex("entries out of order"));
        }

        Ok(Self {
            entries,
            total_uncompressed,
            total_compressed,
        })
    }

    /// Serialize as a skippable chunk that [`Index::load_stream`] accepts
    /// when appended to the end of a stream.
    pub fn to_chunk(&self) -> Vec<u8> {
        let body_len = INDEX_MAGIC.len() + 4 + 8 + 8 + self.entries.len() * 16 + TAIL_SIZE;
        let chunk_len = frame::HEADER_SIZE + body_len;
        debug_assert!(body_len < 1 << 24);

        let mut out = Vec::with_capacity(chunk_len);
        out.push(frame::CHUNK_INDEX);
        out.extend_from_slice(&(body_len as u32).to_le_bytes()[..3]);
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.total_uncompressed.to_le_bytes());
        out.extend_from_slice(&self.total_compressed.to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.uncompressed_offset.to_le_bytes());
            out.extend_from_slice(&entry.compressed_offset.to_le_bytes());
        }
        out.extend_from_slice(&(chunk_len as u32).to_le_bytes());
        out.extend_from_slice(INDEX_TRAILER_MAGIC);
        out
    }

    /// Nearest checkpoint at or before `offset`, as
    /// `(compressed_offset, uncompressed_offset)`.
    ///
    /// Offsets past the last checkpoint resolve to it; the caller discovers
    /// end of stream when the chunk walk runs out of data.
    pub fn find(&self, offset: u64) -> Result<(u64, u64)> {
        let i = self
            .entries
            .partition_point(|e| e.uncompressed_offset <= offset);
        if i == 0 {
            return Err(Error::OffsetOutOfRange {
                offset,
                len: self.total_uncompressed,
            });
        }
        let entry = self.entries[i - 1];
        Ok((entry.compressed_offset, entry.uncompressed_offset))
    }

    /// Checkpoints in uncompressed-offset order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Total plaintext size of the indexed stream.
    pub fn total_uncompressed(&self) -> u64 {
        self.total_uncompressed
    }

    /// Size of the compressed stream the index was built over.
    pub fn total_compressed(&self) -> u64 {
        self.total_compressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_chunk(kind: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&(body.len() as u32).to_le_bytes()[..3]);
        out.extend_from_slice(body);
        out
    }

    fn uncompressed_chunk(payload: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; frame::CHECKSUM_SIZE];
        body.extend_from_slice(payload);
        raw_chunk(frame::CHUNK_UNCOMPRESSED_DATA, &body)
    }

    fn compressed_chunk(payload: &[u8]) -> Vec<u8> {
        let encoded = snap::raw::Encoder::new().compress_vec(payload).unwrap();
        let mut body = vec![0u8; frame::CHECKSUM_SIZE];
        body.extend_from_slice(&encoded);
        raw_chunk(frame::CHUNK_COMPRESSED_DATA, &body)
    }

    fn stream_ident() -> Vec<u8> {
        raw_chunk(frame::CHUNK_STREAM_IDENTIFIER, b"sNaPpY")
    }

    #[test]
    fn test_build_walks_data_chunks() {
        let mut data = stream_ident();
        data.extend(uncompressed_chunk(b"hello "));
        data.extend(compressed_chunk(&[0x5A; 1000]));
        data.extend(uncompressed_chunk(b"tail"));

        let idx = Index::build(&data).unwrap();
        assert_eq!(idx.entries().len(), 3);
        assert_eq!(idx.total_uncompressed(), 6 + 1000 + 4);
        assert_eq!(idx.total_compressed(), data.len() as u64);

        assert_eq!(idx.entries()[0].uncompressed_offset, 0);
        assert_eq!(idx.entries()[0].compressed_offset, 10);
        assert_eq!(idx.entries()[1].uncompressed_offset, 6);
        assert_eq!(idx.entries()[2].uncompressed_offset, 1006);
    }

    #[test]
    fn test_build_rejects_unskippable_chunk() {
        let mut data = stream_ident();
        data.extend(raw_chunk(0x42, b"????"));

        let err = Index::build(&data).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedChunk {
                chunk_type: 0x42,
                offset: 10,
            }
        ));
    }

    #[test]
    fn test_find_checkpoints() {
        let mut data = stream_ident();
        data.extend(uncompressed_chunk(&[b'a'; 100]));
        data.extend(uncompressed_chunk(&[b'b'; 100]));
        let idx = Index::build(&data).unwrap();

        let second_chunk = idx.entries()[1].compressed_offset;
        assert_eq!(idx.find(0).unwrap(), (10, 0));
        assert_eq!(idx.find(99).unwrap(), (10, 0));
        assert_eq!(idx.find(100).unwrap(), (second_chunk, 100));
        assert_eq!(idx.find(199).unwrap(), (second_chunk, 100));
        // Past the end still resolves to the last checkpoint.
        assert_eq!(idx.find(5000).unwrap(), (second_chunk, 100));
    }

    #[test]
    fn test_find_on_empty_index() {
        let idx = Index::default();
        let err = idx.find(0).unwrap_err();
        assert!(matches!(err, Error::OffsetOutOfRange { offset: 0, len: 0 }));
    }

    #[test]
    fn test_chunk_round_trip() {
        let mut data = stream_ident();
        data.extend(uncompressed_chunk(&[b'a'; 100]));
        data.extend(compressed_chunk(&[b'b'; 5000]));
        let built = Index::build(&data).unwrap();

        data.extend(built.to_chunk());
        let loaded = Index::load_stream(&data).unwrap();

        assert_eq!(loaded.entries(), built.entries());
        assert_eq!(loaded.total_uncompressed(), built.total_uncompressed());
        assert_eq!(loaded.total_compressed(), built.total_compressed());
    }

    #[test]
    fn test_load_stream_without_index() {
        let mut data = stream_ident();
        data.extend(uncompressed_chunk(b"no index here"));
        assert!(matches!(
            Index::load_stream(&data).unwrap_err(),
            Error::IndexMissing
        ));
        assert!(matches!(
            Index::load_stream(b"").unwrap_err(),
            Error::IndexMissing
        ));
    }

    #[test]
    fn test_load_stream_rejects_corrupt_chunk() {
        let mut data = stream_ident();
        data.extend(uncompressed_chunk(b"payload"));
        let mut chunk = Index::build(&data).unwrap().to_chunk();
        // Flip a byte of the body magic while keeping the tail intact.
        chunk[frame::HEADER_SIZE] ^= 0xff;
        data.extend(chunk);

        assert!(matches!(
            Index::load_stream(&data).unwrap_err(),
            Error::InvalidIndex(_)
        ));
    }

    #[test]
    fn test_load_stream_rejects_bad_length() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(INDEX_TRAILER_MAGIC);
        assert!(matches!(
            Index::load_stream(&data).unwrap_err(),
            Error::InvalidIndex(_)
        ));
    }
}
