//! # Byte Streams
//!
//! Composable, non-blocking byte streams that make up a session's pipeline.
//!
//! A [`ByteStream`] exposes some subset of read, peek, write and flush; the
//! subset is reported by [`ByteStream::capabilities`] and every operation a
//! stream does not support fails with `ProtocolError::Unsupported`.
//!
//! Streams compose by nesting. A decorator owns exactly one [`StreamHandle`]
//! to the stream it wraps; handles are `Arc`s, so the inner stream lives as
//! long as any layer still refers to it and is dropped exactly once, when the
//! last reference goes away.
//!
//! ## Components
//! - **SocketStream**: raw layer over a non-blocking TCP socket
//! - **MemoryStream**: raw layer over an in-process byte queue
//! - **BufferedStream**: accumulates writes and flushes them in bounded chunks
//! - **CipherStream**: AES/CFB8 encryption or decryption of everything passing through
//!
//! ## Non-blocking contract
//! - `read` returns `Err(WouldBlock)` when nothing is available and
//!   `Err(ConnectionClosed)` once the peer has gone; it never returns `Ok(0)`
//!   for a non-empty buffer
//! - `write` may accept fewer bytes than offered, or fail with `WouldBlock`
//! - `flush` returns the number of bytes still held back

pub mod buffered;
pub mod cipher;
pub mod memory;
pub mod socket;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::error::{constants, ProtocolError, Result};

pub use buffered::BufferedStream;
pub use cipher::CipherStream;
pub use memory::MemoryStream;
pub use socket::SocketStream;

/// Shared ownership handle to a stream layer
pub type StreamHandle = Arc<dyn ByteStream>;

/// Operations a stream supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub read: bool,
    pub peek: bool,
    pub write: bool,
    pub flush: bool,
}

impl Capabilities {
    pub const READ: Capabilities = Capabilities {
        read: true,
        peek: false,
        write: false,
        flush: false,
    };

    pub const WRITE: Capabilities = Capabilities {
        read: false,
        peek: false,
        write: true,
        flush: true,
    };

    pub const DUPLEX: Capabilities = Capabilities {
        read: true,
        peek: false,
        write: true,
        flush: true,
    };

    pub fn with_peek(mut self) -> Self {
        self.peek = true;
        self
    }
}

/// A byte sink and/or source in a session pipeline
pub trait ByteStream: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Read up to `buf.len()` bytes, consuming them
    fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(ProtocolError::Unsupported(constants::ERR_NOT_READABLE))
    }

    /// Copy up to `buf.len()` bytes without consuming them
    fn peek(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(ProtocolError::Unsupported(constants::ERR_NOT_PEEKABLE))
    }

    /// Offer `buf` to the stream, returning how many bytes were accepted
    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(ProtocolError::Unsupported(constants::ERR_NOT_WRITABLE))
    }

    /// Push held-back bytes towards the sink, returning how many remain
    fn flush(&self) -> Result<usize> {
        Ok(0)
    }
}

/// How a session waits for its raw stream to become ready again
#[derive(Clone)]
pub enum Readiness {
    Socket(Arc<TcpStream>),
    Notify(Arc<Notify>),
}

impl Readiness {
    pub async fn readable(&self) -> Result<()> {
        match self {
            Readiness::Socket(socket) => Ok(socket.readable().await?),
            Readiness::Notify(notify) => {
                notify.notified().await;
                Ok(())
            }
        }
    }

    pub async fn writable(&self) -> Result<()> {
        match self {
            Readiness::Socket(socket) => Ok(socket.writable().await?),
            Readiness::Notify(_) => {
                tokio::task::yield_now().await;
                Ok(())
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ProtocolError::InvalidState(constants::ERR_LOCK_POISONED))
}
