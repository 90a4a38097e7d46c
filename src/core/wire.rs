//! Payload primitives shared by the packet schemas.
//!
//! [`PacketReader`] walks a frame payload without copying; strings come back
//! as [`WireStr`] views into the frame buffer and are only copied when a
//! handler keeps them. [`WireWrite`] extends any `BufMut` with the matching
//! writers.

use bytes::{Buf, BufMut, Bytes};

use crate::core::varint;
use crate::error::{constants, ProtocolError, Result};

/// A validated UTF-8 string borrowed from a frame buffer
#[derive(Clone, PartialEq, Eq)]
pub struct WireStr(Bytes);

impl WireStr {
    pub fn from_static(s: &'static str) -> Self {
        WireStr(Bytes::from_static(s.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        // Constructed only from bytes that passed UTF-8 validation
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy into an owned `String`, reporting allocation failure instead of aborting
    pub fn to_owned_checked(&self) -> Result<String> {
        let mut owned = String::new();
        owned.try_reserve_exact(self.0.len())?;
        owned.push_str(self.as_str());
        Ok(owned)
    }
}

impl std::fmt::Debug for WireStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}

impl From<&str> for WireStr {
    fn from(s: &str) -> Self {
        WireStr(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// Cursor over a frame payload
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            Err(ProtocolError::malformed(constants::ERR_TRUNCATED_PAYLOAD))
        } else {
            Ok(())
        }
    }

    pub fn read_varint(&mut self) -> Result<i32> {
        let (value, used) = varint::decode(&self.buf)?;
        self.buf.advance(used);
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ProtocolError::malformed("Boolean byte is neither 0 nor 1")),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read a varint-prefixed UTF-8 string of at most `max_chars` characters
    pub fn read_str(&mut self, max_chars: usize) -> Result<WireStr> {
        let text = self.read_str_bytes(max_chars * 4)?;
        if text.as_str().chars().count() > max_chars {
            return Err(ProtocolError::malformed(constants::ERR_STRING_TOO_LONG));
        }
        Ok(text)
    }

    /// Read a string bounded only by its encoded length; the caller applies
    /// any character limit
    pub fn read_str_bytes(&mut self, max_bytes: usize) -> Result<WireStr> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= max_bytes)
            .ok_or(ProtocolError::malformed(constants::ERR_STRING_TOO_LONG))?;
        self.need(len)?;
        let raw = self.buf.split_to(len);
        std::str::from_utf8(&raw)
            .map_err(|_| ProtocolError::malformed(constants::ERR_INVALID_UTF8))?;
        Ok(WireStr(raw))
    }

    pub fn read_string(&mut self, max_chars: usize) -> Result<String> {
        self.read_str(max_chars)?.to_owned_checked()
    }

    /// Read a varint-prefixed byte array of at most `max_len` bytes
    pub fn read_byte_array(&mut self, max_len: usize) -> Result<Bytes> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= max_len)
            .ok_or(ProtocolError::malformed("Byte array length out of range"))?;
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Fail if any payload bytes were left unread
    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            Err(ProtocolError::malformed(constants::ERR_TRAILING_BYTES))
        } else {
            Ok(())
        }
    }
}

/// Writers for the payload primitives
pub trait WireWrite: BufMut {
    fn put_varint(&mut self, value: i32) {
        varint::encode(value, self);
    }

    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_string(&mut self, value: &str) {
        self.put_varint(value.len() as i32);
        self.put_slice(value.as_bytes());
    }

    fn put_byte_array(&mut self, value: &[u8]) {
        self.put_varint(value.len() as i32);
        self.put_slice(value);
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}
