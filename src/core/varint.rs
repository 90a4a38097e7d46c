//! # VarInt
//!
//! 32-bit integers in the 7-bit continuation format used for every length,
//! packet id and many payload fields.
//!
//! Each byte carries 7 payload bits, least significant group first; the high
//! bit is set on every byte except the last. Negative values use their full
//! twos-complement bit pattern and therefore always take 5 bytes.
//!
//! ```rust
//! use craft_protocol::core::varint;
//!
//! let bytes = varint::encode_to_vec(25565);
//! assert_eq!(bytes, [0xdd, 0xc7, 0x01]);
//! assert_eq!(varint::decode(&bytes).unwrap(), (25565, 3));
//! ```

use bytes::BufMut;

use crate::error::{constants, ProtocolError, Result};

/// Maximum encoded length of a 32-bit varint
pub const MAX_VARINT_LEN: usize = 5;

const SEGMENT_BITS: u32 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Append the encoding of `value` to `buf`
#[inline]
pub fn encode<B: BufMut + ?Sized>(value: i32, buf: &mut B) {
    let mut remaining = value as u32;
    loop {
        if remaining & !SEGMENT_BITS == 0 {
            buf.put_u8(remaining as u8);
            return;
        }
        buf.put_u8((remaining & SEGMENT_BITS) as u8 | CONTINUE_BIT);
        remaining >>= 7;
    }
}

pub fn encode_to_vec(value: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode(value, &mut out);
    out
}

/// Number of bytes `value` occupies on the wire
#[inline]
pub fn encoded_len(value: i32) -> usize {
    let bits = 32 - (value as u32).leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a varint from the front of `bytes`, returning the value and the
/// number of bytes consumed.
///
/// # Errors
/// Returns `ProtocolError::Malformed` if the fifth byte still carries a
/// continuation bit or the input ends before the varint terminates.
pub fn decode(bytes: &[u8]) -> Result<(i32, usize)> {
    peek(bytes)?.ok_or(ProtocolError::malformed(constants::ERR_VARINT_TRUNCATED))
}

/// Incremental variant of [`decode`] for buffers that may still be filling.
///
/// Returns `Ok(None)` when `bytes` holds an unterminated prefix shorter than
/// [`MAX_VARINT_LEN`], so the caller can wait for more input.
pub fn peek(bytes: &[u8]) -> Result<Option<(i32, usize)>> {
    let mut value: u32 = 0;
    for (index, &byte) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= (byte as u32 & SEGMENT_BITS) << (7 * index);
        if byte & CONTINUE_BIT == 0 {
            return Ok(Some((value as i32, index + 1)));
        }
    }

    if bytes.len() >= MAX_VARINT_LEN {
        Err(ProtocolError::malformed(constants::ERR_VARINT_TOO_LONG))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_boundary_lengths() {
        let cases: [(i32, usize); 9] = [
            (0, 1),
            (127, 1),
            (128, 2),
            (255, 2),
            (25565, 3),
            (2_097_151, 3),
            (i32::MAX, 5),
            (-1, 5),
            (i32::MIN, 5),
        ];
        for (value, len) in cases {
            let bytes = encode_to_vec(value);
            assert_eq!(bytes.len(), len, "encoded length of {value}");
            assert_eq!(encoded_len(value), len, "predicted length of {value}");
            assert_eq!(decode(&bytes).unwrap(), (value, len));
        }
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode_to_vec(0), [0x00]);
        assert_eq!(encode_to_vec(128), [0x80, 0x01]);
        assert_eq!(encode_to_vec(255), [0xff, 0x01]);
        assert_eq!(encode_to_vec(-1), [0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert_eq!(encode_to_vec(i32::MIN), [0x80, 0x80, 0x80, 0x80, 0x08]);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(decode(&[0x01, 0xff, 0xff]).unwrap(), (1, 1));
    }

    #[test]
    fn test_fifth_byte_continuation_is_malformed() {
        let err = decode(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        assert_eq!(decode(&[]).unwrap_err().kind(), ErrorKind::Malformed);
        assert_eq!(decode(&[0x80, 0x80]).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_peek_waits_for_more_input() {
        assert!(peek(&[]).unwrap().is_none());
        assert!(peek(&[0xdd, 0xc7]).unwrap().is_none());
        assert_eq!(peek(&[0xdd, 0xc7, 0x01]).unwrap(), Some((25565, 3)));
        assert!(peek(&[0x80; 5]).is_err());
    }
}
