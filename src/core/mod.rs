//! # Core Protocol Components
//!
//! Varint primitive, phase state machine, payload primitives and framing.
//!
//! ## Components
//! - **Varint**: 7-bit continuation integers, 1-5 bytes
//! - **Phase**: forward-only session phase
//! - **Wire**: zero-copy payload reader and `BufMut` writers
//! - **Codec**: tokio-util codec for length-prefixed, optionally compressed frames
//!
//! ## Wire Format
//! ```text
//! uncompressed:  [Length(varint)] [Id(varint)] [Payload(N)]
//! compressed:    [Length(varint)] [DataLength(varint)] [zlib(Id ++ Payload) | Id ++ Payload]
//! ```
//!
//! A data length of zero marks a body sent uncompressed because it was below
//! the threshold.
//!
//! ## Security
//! - Maximum frame size: 2 097 151 bytes (largest 3-byte varint)
//! - Length validation before allocation

pub mod codec;
pub mod phase;
pub mod varint;
pub mod wire;
