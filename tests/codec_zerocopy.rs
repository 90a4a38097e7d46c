//! Integration tests for zero-copy codec operations
//!
//! These tests check that the frame codec splits payloads out of the receive
//! buffer instead of copying them, and leaves partial input untouched.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use craft_protocol::core::codec::{Frame, FrameCodec};
use craft_protocol::core::wire::{PacketReader, WireWrite};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn test_codec_decode_zero_copy_split() {
    let mut codec = FrameCodec::default();
    let mut buffer = BytesMut::new();
    codec
        .encode(Frame::new(7, vec![1, 2, 3, 4, 5]), &mut buffer)
        .unwrap();
    let original_capacity = buffer.capacity();

    let decoded = codec.decode(&mut buffer).expect("Failed to decode").unwrap();
    assert_eq!(decoded.id, 7);
    assert_eq!(&decoded.payload[..], &[1, 2, 3, 4, 5]);

    // Buffer is empty after the split and was not reallocated
    assert_eq!(buffer.len(), 0);
    assert!(buffer.capacity() <= original_capacity);
}

#[test]
fn test_payload_points_into_receive_buffer() {
    let mut codec = FrameCodec::default();
    let mut buffer = BytesMut::new();
    codec
        .encode(Frame::new(1, vec![0xAB; 256]), &mut buffer)
        .unwrap();
    let start = buffer.as_ptr() as usize;
    let end = start + buffer.len();

    let frame = codec.decode(&mut buffer).unwrap().unwrap();
    let payload_at = frame.payload.as_ptr() as usize;
    assert!(payload_at > start && payload_at < end);
}

#[test]
fn test_codec_partial_decode_preserves_buffer() {
    let mut codec = FrameCodec::default();

    // Declares 32 bytes, carries 4
    let mut buffer = BytesMut::from(&[0x20, 0x00, 0x01, 0x02, 0x03][..]);
    let result = codec.decode(&mut buffer).expect("Decode should not error");

    assert!(result.is_none());
    assert_eq!(buffer.len(), 5);
    // Space for the rest of the frame was reserved up front
    assert!(buffer.capacity() >= 33);
}

#[test]
fn test_partial_length_prefix_waits() {
    let mut codec = FrameCodec::default();
    let mut buffer = BytesMut::from(&[0x80, 0x80][..]);
    assert!(codec.decode(&mut buffer).unwrap().is_none());
    assert_eq!(buffer.len(), 2);
}

#[test]
fn test_codec_encode_reserves_space_efficiently() {
    let mut codec = FrameCodec::default();
    let mut buffer = BytesMut::new();
    codec
        .encode(Frame::new(2, vec![0u8; 1000]), &mut buffer)
        .unwrap();

    // 2-byte length, 1-byte id, payload
    assert_eq!(buffer.len(), 1003);
}

#[test]
fn test_multiple_frames_in_one_buffer() {
    let mut codec = FrameCodec::default();
    let mut buffer = BytesMut::new();
    for i in 0..10 {
        codec
            .encode(Frame::new(i, vec![i as u8; i as usize * 10]), &mut buffer)
            .unwrap();
    }

    for i in 0..10 {
        let frame = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(frame.id, i);
        assert_eq!(frame.payload.len(), i as usize * 10);
    }
    assert!(codec.decode(&mut buffer).unwrap().is_none());
}

#[test]
fn test_uncompressed_body_under_compression_is_not_copied() {
    let mut codec = FrameCodec::default();
    codec.enable_compression(1024, 6).unwrap();
    let mut buffer = BytesMut::new();
    codec
        .encode(Frame::new(3, vec![9u8; 100]), &mut buffer)
        .unwrap();
    let start = buffer.as_ptr() as usize;
    let end = start + buffer.len();

    let frame = codec.decode(&mut buffer).unwrap().unwrap();
    let payload_at = frame.payload.as_ptr() as usize;
    assert!(payload_at > start && payload_at < end);
}

#[test]
fn test_reader_strings_share_payload() {
    let mut payload = BytesMut::new();
    payload.put_string("localhost");
    payload.put_string("Steve");
    let payload: Bytes = payload.freeze();
    let base = payload.as_ptr() as usize;

    let mut reader = PacketReader::new(payload.clone());
    let host = reader.read_str(255).unwrap();
    let name = reader.read_str(16).unwrap();
    reader.finish().unwrap();

    assert_eq!(host.as_str(), "localhost");
    assert_eq!(name.as_str(), "Steve");
    assert_eq!(host.as_str().as_ptr() as usize, base + 1);
}

#[test]
fn test_encode_appends_without_clearing() {
    let mut codec = FrameCodec::default();
    let mut buffer = BytesMut::from(&b"prefix"[..]);
    codec.encode(Frame::new(0, Bytes::new()), &mut buffer).unwrap();
    assert_eq!(&buffer[..6], b"prefix");
    assert_eq!(&buffer[6..], &[0x01, 0x00]);
}
