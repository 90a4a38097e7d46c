//! # Error Types
//!
//! Error handling for the session engine.
//!
//! Every fallible operation returns a [`Result`] carrying a [`ProtocolError`].
//! There is no ambient "last error" slot: the error travels with the call that
//! produced it, and any owned cause is released when the error is dropped.
//!
//! ## Error Categories
//! - **Malformed**: framing, varint or payload codec violations
//! - **Closed**: the peer is gone; stop writing and tear the session down
//! - **WouldBlock**: transient non-blocking condition, retry later
//! - **OutOfMemory**: allocation failure, reported without allocating again
//! - **ProtocolMismatch**: client and server disagree on the protocol revision
//!
//! [`ProtocolError::kind`] maps each variant onto one of these categories so
//! callers can branch on the kind without matching every variant.
//!
//! ## Example Usage
//! ```rust
//! use craft_protocol::core::varint;
//! use craft_protocol::error::ErrorKind;
//!
//! let err = varint::decode(&[0x80, 0x80]).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Malformed);
//! ```

use std::borrow::Cow;
use std::io;
use thiserror::Error;

use crate::core::phase::Phase;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Varint errors
    pub const ERR_VARINT_TOO_LONG: &str = "VarInt is longer than 5 bytes";
    pub const ERR_VARINT_TRUNCATED: &str = "VarInt ended before its final byte";

    /// Framing errors
    pub const ERR_EMPTY_FRAME: &str = "Frame declares a zero length body";
    pub const ERR_NEGATIVE_LENGTH: &str = "Frame declares a negative length";
    pub const ERR_BAD_DATA_LENGTH: &str = "Compressed frame declares an invalid data length";
    pub const ERR_UNDERSIZED_COMPRESSED: &str = "Compressed frame is below the compression threshold";
    pub const ERR_DATA_LENGTH_MISMATCH: &str = "Decompressed size does not match the declared data length";

    /// Payload errors
    pub const ERR_TRAILING_BYTES: &str = "Unexpected trailing bytes after payload";
    pub const ERR_TRUNCATED_PAYLOAD: &str = "Payload ended early";
    pub const ERR_STRING_TOO_LONG: &str = "String exceeds its maximum length";
    pub const ERR_INVALID_UTF8: &str = "String is not valid UTF-8";
    pub const ERR_UNKNOWN_PACKET: &str = "Unknown packet id for the current phase";
    pub const ERR_INVALID_NEXT_PHASE: &str = "Handshake requested an invalid next phase";
    pub const ERR_INVALID_CHAT_MODE: &str = "Client settings carry an invalid chat mode";
    pub const ERR_NOT_SENDABLE: &str = "Packet cannot be sent in the current phase";

    /// Connection errors
    pub const ERR_CLOSED_MID_FRAME: &str = "Connection closed in the middle of a frame";

    /// Stream capability errors
    pub const ERR_NOT_READABLE: &str = "Stream does not support read";
    pub const ERR_NOT_PEEKABLE: &str = "Stream does not support peek";
    pub const ERR_NOT_WRITABLE: &str = "Stream does not support write";

    /// Session state errors
    pub const ERR_COMPRESSION_ACTIVE: &str = "Compression is already enabled for this session";
    pub const ERR_ENCRYPTION_ACTIVE: &str = "Encryption is already enabled for this session";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_DUPLICATE_PLAYER: &str = "A player with that name is already online";
    pub const ERR_SERVER_FULL: &str = "The server is full";
    pub const ERR_SESSION_CLOSED: &str = "Session is closed";
}

// ProtocolError is the primary error type for all engine operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("Malformed data: {0}")]
    Malformed(Cow<'static, str>),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Operation would block")]
    WouldBlock,

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Protocol mismatch: client speaks {client}, server speaks {server}")]
    ProtocolMismatch { client: i32, server: i32 },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Unsupported stream operation: {0}")]
    Unsupported(&'static str),

    #[error("Invalid phase transition from {from:?} to {to:?}")]
    InvalidPhaseTransition { from: Phase, to: Phase },

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{message}")]
    Custom {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Discriminable error kind, independent of the carried detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Malformed,
    Closed,
    WouldBlock,
    OutOfMemory,
    ProtocolMismatch,
    Io,
    Other,
}

impl ProtocolError {
    /// Build a malformed-data error from a static message without allocating
    pub const fn malformed(msg: &'static str) -> Self {
        ProtocolError::Malformed(Cow::Borrowed(msg))
    }

    /// Build a custom error wrapping an underlying cause
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ProtocolError::Custom {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Malformed(_)
            | ProtocolError::OversizedPacket(_)
            | ProtocolError::DecompressionFailure
            | ProtocolError::InvalidPhaseTransition { .. } => ErrorKind::Malformed,
            ProtocolError::ConnectionClosed => ErrorKind::Closed,
            ProtocolError::WouldBlock => ErrorKind::WouldBlock,
            ProtocolError::OutOfMemory => ErrorKind::OutOfMemory,
            ProtocolError::ProtocolMismatch { .. } => ErrorKind::ProtocolMismatch,
            ProtocolError::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.kind() == ErrorKind::Closed
    }

    pub fn is_would_block(&self) -> bool {
        self.kind() == ErrorKind::WouldBlock
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => ProtocolError::WouldBlock,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ProtocolError::ConnectionClosed,
            io::ErrorKind::OutOfMemory => ProtocolError::OutOfMemory,
            _ => ProtocolError::Io(err),
        }
    }
}

impl From<std::collections::TryReserveError> for ProtocolError {
    fn from(_: std::collections::TryReserveError) -> Self {
        ProtocolError::OutOfMemory
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_classified() {
        let would_block: ProtocolError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(would_block.is_would_block());

        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
        ] {
            let err: ProtocolError = io::Error::from(kind).into();
            assert!(err.is_closed(), "{kind:?} should map to Closed");
        }

        let other: ProtocolError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert_eq!(other.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_out_of_memory_is_static() {
        let err = ProtocolError::OutOfMemory;
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert_eq!(err.to_string(), "Out of memory");
    }

    #[test]
    fn test_custom_error_keeps_cause() {
        use std::error::Error as _;

        let cause = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let err = ProtocolError::with_source("could not persist", cause);
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.source().is_some());
    }
}
