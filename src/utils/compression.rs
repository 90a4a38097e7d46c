use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::config::MAX_PACKET_SIZE;
use crate::error::{constants, ProtocolError, Result};

/// Maximum output size for decompression (align with MAX_PACKET_SIZE to prevent DoS)
pub const MAX_DECOMPRESSION_SIZE: usize = MAX_PACKET_SIZE;

/// Whether a body of `len` bytes crosses the compression threshold.
/// The threshold itself compresses.
#[inline]
pub fn should_compress(len: usize, threshold: usize) -> bool {
    len >= threshold
}

/// Zlib-compress `data` into `out` at the given level (0-9)
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if the encoder fails
pub fn compress_into<W: Write>(data: &[u8], level: u32, out: W) -> Result<W> {
    let mut encoder = ZlibEncoder::new(out, Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|_| ProtocolError::CompressionFailure)?;
    encoder.finish().map_err(|_| ProtocolError::CompressionFailure)
}

/// Zlib-compress `data` into a fresh buffer
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    compress_into(data, level, Vec::with_capacity(data.len() / 2 + 16))
}

/// Inflate `data`, which must expand to exactly `expected_len` bytes.
///
/// The declared length is checked against MAX_DECOMPRESSION_SIZE before any
/// allocation, and the decoder is never allowed to produce more than one byte
/// past the declared length, so a lying header cannot be used as a
/// decompression bomb.
///
/// # Errors
/// - `ProtocolError::DecompressionFailure` if the stream is corrupt or the
///   declared size exceeds the limit
/// - `ProtocolError::Malformed` if the inflated size differs from `expected_len`
/// - `ProtocolError::OutOfMemory` if the output buffer cannot be reserved
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    if expected_len > MAX_DECOMPRESSION_SIZE {
        return Err(ProtocolError::DecompressionFailure);
    }

    let mut out = Vec::new();
    out.try_reserve_exact(expected_len)?;

    ZlibDecoder::new(data)
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| ProtocolError::DecompressionFailure)?;

    if out.len() != expected_len {
        return Err(ProtocolError::malformed(constants::ERR_DATA_LENGTH_MISMATCH));
    }
    Ok(out)
}
