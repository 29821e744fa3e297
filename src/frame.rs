//! Snappy/S2 stream framing
//!
//! A framed stream is a sequence of chunks, each a 4-byte header followed by
//! a body: one type byte and a 24-bit little-endian body length. Data chunks
//! prefix their payload with a 4-byte checksum. Chunk types `0x02..=0x7f`
//! are reserved unskippable; `0x80..=0xff` are skippable and include the
//! stream identifier and the trailing seek index.

use byteorder::{ByteOrder, LittleEndian};

/// Size of a chunk header: type byte plus 24-bit length.
pub const HEADER_SIZE: usize = 4;

/// Size of the checksum prefixing the body of a data chunk.
pub const CHECKSUM_SIZE: usize = 4;

/// S2/Snappy-compressed data chunk.
pub const CHUNK_COMPRESSED_DATA: u8 = 0x00;

/// Raw plaintext data chunk.
pub const CHUNK_UNCOMPRESSED_DATA: u8 = 0x01;

/// Trailing seek index chunk (skippable).
pub const CHUNK_INDEX: u8 = 0x99;

/// Stream identifier chunk (skippable, first in the stream).
pub const CHUNK_STREAM_IDENTIFIER: u8 = 0xff;

/// Highest reserved unskippable chunk type.
pub const MAX_UNSKIPPABLE_CHUNK: u8 = 0x7f;

/// A parsed chunk: its type, body, and the offset of the next header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Chunk<'d> {
    pub kind: u8,
    pub body: &'d [u8],
    pub next: u64,
}

impl<'d> Chunk<'d> {
    /// The body with the leading checksum stripped.
    ///
    /// Empty if the body is shorter than a checksum.
    pub fn payload(&self) -> &'d [u8] {
        self.body.get(CHECKSUM_SIZE..).unwrap_or(&[])
    }
}

/// Parse the chunk whose header starts at `offset`.
///
/// Returns `None` when `offset` is at or past the end of `data`, or when the
/// remaining bytes cannot hold the header and body the header announces.
pub(crate) fn parse_chunk(data: &[u8], offset: u64) -> Option<Chunk<'_>> {
    let start = usize::try_from(offset).ok()?;
    let header = data.get(start..start + HEADER_SIZE)?;
    let len = LittleEndian::read_u24(&header[1..]) as usize;
    let body = data.get(start + HEADER_SIZE..start + HEADER_SIZE + len)?;
    Some(Chunk {
        kind: header[0],
        body,
        next: offset + (HEADER_SIZE + len) as u64,
    })
}
