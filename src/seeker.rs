//! Random-access reads over a framed stream held in memory
//!
//! A [`Seeker`] borrows a complete compressed stream, resolves uncompressed
//! offsets to chunk boundaries through its [`Index`], and serves byte ranges
//! while decompressing only the chunks that cover the request. Reads return
//! a [`ReadGuard`] that keeps the underlying block or assembly buffer alive
//! until dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::trace;

use crate::allocator::{Allocator, DefaultAllocator, OwnedBuf};
use crate::cache::{self, BlockGuard, SeekerShared};
use crate::error::{Error, Result};
use crate::frame;
use crate::index::Index;

/// Random-access reader over one compressed stream.
///
/// The stream bytes are borrowed and must outlive the seeker; they are
/// never written to. A seeker is safe to share across threads.
pub struct Seeker<'d> {
    data: &'d [u8],
    index: Index,
    shared: Arc<SeekerShared>,
}

impl fmt::Debug for Seeker<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seeker")
            .field("data_len", &self.data.len())
            .field("index", &self.index)
            .finish()
    }
}

/// Configures and constructs a [`Seeker`]
pub struct SeekerBuilder<'d> {
    data: &'d [u8],
    allocator: Arc<dyn Allocator>,
    index: Option<Index>,
    build_index: bool,
}

impl<'d> SeekerBuilder<'d> {
    fn new(data: &'d [u8]) -> Self {
        Self {
            data,
            allocator: Arc::new(DefaultAllocator),
            index: None,
            build_index: false,
        }
    }

    /// Use `allocator` for decompressed blocks and assembly buffers.
    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Use a caller-supplied index instead of loading one from the stream.
    pub fn index(mut self, index: Index) -> Self {
        self.index = Some(index);
        self
    }

    /// Build an index with a full pass over the stream when it does not
    /// carry one.
    pub fn allow_build_index(mut self) -> Self {
        self.build_index = true;
        self
    }

    pub fn build(self) -> Result<Seeker<'d>> {
        let index = match self.index {
            Some(index) => index,
            None => match Index::load_stream(self.data) {
                Ok(index) => index,
                Err(Error::IndexMissing) if self.build_index => Index::build(self.data)?,
                Err(err) => return Err(err),
            },
        };
        Ok(Seeker {
            data: self.data,
            index,
            shared: SeekerShared::new(self.allocator),
        })
    }
}

impl<'d> Seeker<'d> {
    /// Create a seeker over `data` with default options.
    ///
    /// The index must be present at the end of the stream; use
    /// [`Seeker::builder`] to supply one or to allow building it.
    pub fn new(data: &'d [u8]) -> Result<Self> {
        Self::builder(data).build()
    }

    /// Start configuring a seeker over `data`.
    pub fn builder(data: &'d [u8]) -> SeekerBuilder<'d> {
        SeekerBuilder::new(data)
    }

    /// Total plaintext size of the stream.
    pub fn uncompressed_len(&self) -> u64 {
        self.index.total_uncompressed()
    }

    /// The index the seeker resolves offsets through.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Number of blocks referenced by outstanding read guards.
    pub fn active_blocks(&self) -> usize {
        self.shared.active_count()
    }

    /// Number of this stream's idle blocks resident in the global cache.
    pub fn cached_blocks(&self) -> usize {
        self.shared.resident_count()
    }

    /// Read `length` plaintext bytes starting at uncompressed `offset`.
    ///
    /// Returns a view of exactly `length` bytes. A read contained in a
    /// single chunk is served zero-copy from the cached block or the input
    /// buffer; a read spanning chunks is assembled into one contiguous
    /// buffer. The view stays valid until the guard is dropped and must
    /// not be modified.
    pub fn read(&self, offset: u64, length: usize) -> Result<ReadGuard<'d>> {
        if length == 0 {
            if offset > self.index.total_uncompressed() {
                return Err(Error::UnexpectedEof { offset, length });
            }
            return Ok(ReadGuard { repr: Repr::Empty });
        }
        trace!("read of {length} bytes at offset {offset}");

        let (mut compr_off, uncompr_off) = self.index.find(offset)?;
        let mut skip = offset - uncompr_off;
        let mut assembled: Option<OwnedBuf> = None;

        while let Some(chunk) = frame::parse_chunk(self.data, compr_off) {
            let plain = match chunk.kind {
                frame::CHUNK_COMPRESSED_DATA => {
                    let payload = chunk.payload();
                    let decoded_len = snap::raw::decompress_len(payload)?;
                    if skip >= decoded_len as u64 {
                        skip -= decoded_len as u64;
                        None
                    } else {
                        let body_offset = compr_off
                            + (frame::HEADER_SIZE + frame::CHECKSUM_SIZE) as u64;
                        let block =
                            cache::get_block(&self.shared, payload, body_offset, decoded_len)?;
                        Some(PlainChunk::Block {
                            block,
                            skip: skip as usize,
                        })
                    }
                }
                frame::CHUNK_UNCOMPRESSED_DATA => {
                    let payload = chunk.payload();
                    if skip >= payload.len() as u64 {
                        skip -= payload.len() as u64;
                        None
                    } else {
                        Some(PlainChunk::Direct(&payload[skip as usize..]))
                    }
                }
                kind if kind <= frame::MAX_UNSKIPPABLE_CHUNK => {
                    return Err(Error::UnsupportedChunk {
                        chunk_type: kind,
                        offset: compr_off,
                    });
                }
                _ => None,
            };

            if let Some(plain) = plain {
                let avail = plain.len();
                match &mut assembled {
                    // The request fits inside this chunk: hand out the
                    // block or input slice directly, no copy.
                    None if avail >= length => {
                        return Ok(plain.into_read_guard(length));
                    }
                    None => {
                        let mut buf = OwnedBuf::new(self.shared.allocator(), length);
                        buf.clear();
                        buf.extend_from_slice(plain.bytes());
                        assembled = Some(buf);
                    }
                    Some(buf) => {
                        let take = avail.min(length - buf.len());
                        buf.extend_from_slice(&plain.bytes()[..take]);
                    }
                }
                // The block reference drops here, before the walk moves on.
                if let Some(buf) = assembled.take() {
                    if buf.len() == length {
                        return Ok(ReadGuard {
                            repr: Repr::Assembled(buf),
                        });
                    }
                    assembled = Some(buf);
                }
                skip = 0;
            }
            compr_off = chunk.next;
        }

        Err(Error::UnexpectedEof { offset, length })
    }

    /// Read into `dst` starting at uncompressed `offset`.
    ///
    /// Fills all of `dst` or fails; a range past the end of the stream
    /// yields [`Error::UnexpectedEof`] with nothing copied.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        let view = self.read(offset, dst.len())?;
        dst.copy_from_slice(&view);
        Ok(dst.len())
    }
}

impl Drop for Seeker<'_> {
    fn drop(&mut self) {
        cache::detach_seeker(&self.shared);
    }
}

/// Plaintext of a single chunk, past any skipped prefix.
enum PlainChunk<'d> {
    /// Slice of an uncompressed chunk body inside the input buffer.
    Direct(&'d [u8]),
    /// Suffix of a cached decompressed block.
    Block { block: BlockGuard, skip: usize },
}

impl<'d> PlainChunk<'d> {
    fn bytes(&self) -> &[u8] {
        match self {
            PlainChunk::Direct(slice) => slice,
            PlainChunk::Block { block, skip } => &block.bytes()[*skip..],
        }
    }

    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn into_read_guard(self, length: usize) -> ReadGuard<'d> {
        match self {
            PlainChunk::Direct(slice) => ReadGuard {
                repr: Repr::Direct(&slice[..length]),
            },
            PlainChunk::Block { block, skip } => ReadGuard {
                repr: Repr::Block {
                    block,
                    start: skip,
                    len: length,
                },
            },
        }
    }
}

/// View over plaintext returned by [`Seeker::read`].
///
/// Dereferences to the requested bytes. Dropping the guard releases the
/// block reference or assembly buffer backing the view.
pub struct ReadGuard<'d> {
    repr: Repr<'d>,
}

impl fmt::Debug for ReadGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadGuard")
            .field("len", &self.len())
            .finish()
    }
}

enum Repr<'d> {
    Empty,
    Direct(&'d [u8]),
    Block {
        block: BlockGuard,
        start: usize,
        len: usize,
    },
    Assembled(OwnedBuf),
}

impl Deref for ReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.repr {
            Repr::Empty => &[],
            Repr::Direct(slice) => slice,
            Repr::Block { block, start, len } => &block.bytes()[*start..*start + *len],
            Repr::Assembled(buf) => buf.as_slice(),
        }
    }
}

impl AsRef<[u8]> for ReadGuard<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn encode(plain: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut enc = snap::write::FrameEncoder::new(&mut out);
        enc.write_all(plain).unwrap();
        enc.flush().unwrap();
        drop(enc);
        out
    }

    fn encode_indexed(plain: &[u8]) -> Vec<u8> {
        let mut data = encode(plain);
        let index = Index::build(&data).unwrap();
        data.extend(index.to_chunk());
        data
    }

    #[test]
    fn test_zero_length_reads() {
        let data = encode_indexed(b"0123456789");
        let seeker = Seeker::new(&data).unwrap();

        assert!(seeker.read(0, 0).unwrap().is_empty());
        assert!(seeker.read(10, 0).unwrap().is_empty());
        assert!(matches!(
            seeker.read(11, 0).unwrap_err(),
            Error::UnexpectedEof { .. }
        ));
    }

    #[test]
    fn test_index_resolution_order() {
        let plain = b"the stream carries no index chunk";
        let data = encode(plain);

        assert!(matches!(
            Seeker::new(&data).unwrap_err(),
            Error::IndexMissing
        ));

        let seeker = Seeker::builder(&data).allow_build_index().build().unwrap();
        assert_eq!(&*seeker.read(4, 6).unwrap(), b"stream");

        // A supplied index suppresses both loading and building.
        let index = Index::build(&data).unwrap();
        let seeker = Seeker::builder(&data).index(index).build().unwrap();
        assert_eq!(seeker.uncompressed_len(), plain.len() as u64);
    }

    #[test]
    fn test_read_guard_deref() {
        let data = encode_indexed(b"Hello, World!");
        let seeker = Seeker::new(&data).unwrap();

        let view = seeker.read(7, 5).unwrap();
        assert_eq!(view.len(), 5);
        assert_eq!(view.as_ref(), b"World");
        assert_eq!(&view[..2], b"Wo");
    }
}
