//! # Frame Codec
//!
//! Length-prefixed framing with optional zlib compression, as a tokio-util
//! [`Decoder`]/[`Encoder`] pair over `BytesMut`.
//!
//! Decoding is incremental: an incomplete frame leaves the buffer untouched
//! and returns `Ok(None)`. A complete frame is split off the front of the
//! buffer without copying; the payload of an uncompressed frame is a view
//! into the same allocation.
//!
//! Compression is switched on per direction with [`FrameCodec::enable_compression`]
//! and applies from the next frame on. Bodies of at least `threshold` bytes
//! (id plus payload) are deflated; smaller bodies carry a zero data length.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::MAX_PACKET_SIZE;
use crate::core::varint;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::compression;
use crate::utils::metrics::global_metrics;

/// One decoded frame: message id plus raw payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Length of id plus payload, the quantity compared against the threshold
    pub fn body_len(&self) -> usize {
        varint::encoded_len(self.id) + self.payload.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    pub threshold: usize,
    pub level: u32,
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    compression: Option<CompressionSettings>,
    max_packet_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            compression: None,
            max_packet_size: max_packet_size.min(MAX_PACKET_SIZE),
        }
    }

    pub fn compression(&self) -> Option<CompressionSettings> {
        self.compression
    }

    pub fn is_compressing(&self) -> bool {
        self.compression.is_some()
    }

    /// Activate compression for every later frame. Can only happen once.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidState` if compression is already active
    pub fn enable_compression(&mut self, threshold: usize, level: u32) -> Result<()> {
        if self.compression.is_some() {
            return Err(ProtocolError::InvalidState(constants::ERR_COMPRESSION_ACTIVE));
        }
        self.compression = Some(CompressionSettings {
            threshold,
            level: level.min(9),
        });
        Ok(())
    }

    fn split_body(&self, mut body: Bytes) -> Result<Frame> {
        let (id, used) = varint::decode(&body)?;
        body.advance(used);
        Ok(Frame { id, payload: body })
    }

    fn inflate_body(&self, settings: CompressionSettings, mut body: Bytes) -> Result<Bytes> {
        let (data_len, used) = varint::decode(&body)?;
        body.advance(used);

        if data_len == 0 {
            return Ok(body);
        }
        let data_len = usize::try_from(data_len)
            .ok()
            .filter(|len| *len <= self.max_packet_size)
            .ok_or(ProtocolError::malformed(constants::ERR_BAD_DATA_LENGTH))?;
        if data_len < settings.threshold {
            return Err(ProtocolError::malformed(constants::ERR_UNDERSIZED_COMPRESSED));
        }
        Ok(Bytes::from(compression::decompress(&body, data_len)?))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some((length, header)) = varint::peek(src)? else {
            return Ok(None);
        };
        if length < 0 {
            return Err(ProtocolError::malformed(constants::ERR_NEGATIVE_LENGTH));
        }
        if length == 0 {
            return Err(ProtocolError::malformed(constants::ERR_EMPTY_FRAME));
        }
        let length = length as usize;
        if length > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(length));
        }

        if src.len() < header + length {
            src.reserve(header + length - src.len());
            return Ok(None);
        }

        src.advance(header);
        let body = src.split_to(length).freeze();
        trace!(length, "Decoded frame body");

        let body = match self.compression {
            Some(settings) => self.inflate_body(settings, body)?,
            None => body,
        };
        self.split_body(body).map(Some)
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        let body_len = frame.body_len();

        match self.compression {
            None => {
                check_size(body_len, self.max_packet_size)?;
                dst.reserve(varint::MAX_VARINT_LEN + body_len);
                varint::encode(body_len as i32, dst);
                varint::encode(frame.id, dst);
                dst.put_slice(&frame.payload);
            }
            Some(settings) if compression::should_compress(body_len, settings.threshold) => {
                check_size(body_len, self.max_packet_size)?;
                let mut raw = Vec::new();
                raw.try_reserve_exact(body_len)?;
                varint::encode(frame.id, &mut raw);
                raw.extend_from_slice(&frame.payload);
                let deflated = compression::compress(&raw, settings.level)?;

                let inner_len = varint::encoded_len(body_len as i32) + deflated.len();
                check_size(inner_len, self.max_packet_size)?;
                dst.reserve(varint::MAX_VARINT_LEN + inner_len);
                varint::encode(inner_len as i32, dst);
                varint::encode(body_len as i32, dst);
                dst.put_slice(&deflated);
                global_metrics().frame_compressed();
            }
            Some(_) => {
                let inner_len = 1 + body_len;
                check_size(inner_len, self.max_packet_size)?;
                dst.reserve(varint::MAX_VARINT_LEN + inner_len);
                varint::encode(inner_len as i32, dst);
                dst.put_u8(0);
                varint::encode(frame.id, dst);
                dst.put_slice(&frame.payload);
            }
        }
        Ok(())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&Frame>::encode(self, &frame, dst)
    }
}

fn check_size(len: usize, max: usize) -> Result<()> {
    if len > max {
        Err(ProtocolError::OversizedPacket(len))
    } else {
        Ok(())
    }
}
