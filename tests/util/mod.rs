//! Helpers for building framed test streams
#![allow(dead_code)]

use s2seek::frame;
use s2seek::Index;
use std::io::Write;

/// Compress `plain` into a framed stream without an index chunk.
pub fn encode(plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut enc = snap::write::FrameEncoder::new(&mut out);
    enc.write_all(plain).unwrap();
    enc.flush().unwrap();
    drop(enc);
    out
}

/// Compress `plain` and append a trailing index chunk.
pub fn encode_indexed(plain: &[u8]) -> Vec<u8> {
    let mut data = encode(plain);
    let index = Index::build(&data).unwrap();
    data.extend(index.to_chunk());
    data
}

/// A raw chunk with the given type byte and body.
pub fn raw_chunk(kind: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![kind];
    out.extend_from_slice(&(body.len() as u32).to_le_bytes()[..3]);
    out.extend_from_slice(body);
    out
}

/// An uncompressed data chunk carrying `payload` (zero checksum).
pub fn uncompressed_chunk(payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; frame::CHECKSUM_SIZE];
    body.extend_from_slice(payload);
    raw_chunk(frame::CHUNK_UNCOMPRESSED_DATA, &body)
}

/// A compressed data chunk carrying `payload` (zero checksum).
pub fn compressed_chunk(payload: &[u8]) -> Vec<u8> {
    let encoded = snap::raw::Encoder::new().compress_vec(payload).unwrap();
    let mut body = vec![0u8; frame::CHECKSUM_SIZE];
    body.extend_from_slice(&encoded);
    raw_chunk(frame::CHUNK_COMPRESSED_DATA, &body)
}

/// The stream identifier chunk every framed stream starts with.
pub fn stream_ident() -> Vec<u8> {
    raw_chunk(frame::CHUNK_STREAM_IDENTIFIER, b"sNaPpY")
}

/// Deterministic compressible test corpus of `len` bytes.
pub fn corpus(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i / 61 + i / 7) as u8).collect()
}
