//! Error types for seekable stream access

use thiserror::Error;

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced while constructing a seeker or reading from a stream
#[derive(Error, Debug)]
pub enum Error {
    /// The stream carries no seek index and index building was not enabled
    #[error("no seek index found in stream (enable allow_build_index to scan for one)")]
    IndexMissing,

    /// A reserved unskippable chunk was encountered while walking the stream
    #[error("unsupported chunk type {chunk_type:#04x} at offset {offset}")]
    UnsupportedChunk { chunk_type: u8, offset: u64 },

    /// The block codec rejected a compressed chunk body
    #[error("block decode failed: {0}")]
    Decode(#[from] snap::Error),

    /// The requested offset cannot be resolved against the index
    #[error("offset {offset} is outside the indexed range of {len} bytes")]
    OffsetOutOfRange { offset: u64, len: u64 },

    /// The stream ended before the requested range was filled
    #[error("stream ended before {length} bytes could be read at offset {offset}")]
    UnexpectedEof { offset: u64, length: usize },

    /// A trailing index chunk was present but malformed
    #[error("invalid index chunk: {0}")]
    InvalidIndex(&'static str),
}
