//! # Buffered Stream
//!
//! Write-side decorator that splits output into two phases: `write` appends
//! to a growable buffer and always accepts the whole slice, `flush` pushes
//! the buffer to the inner stream in chunks of at most `frame_size` bytes.
//!
//! When the inner stream would block, flushing stops, the already-sent
//! prefix is discarded by shifting the rest to the front of the buffer, and
//! the count of unsent bytes is returned. A later flush resumes exactly where
//! this one stopped, so no byte is sent twice and ordering is preserved.

use std::sync::Mutex;

use tracing::trace;

use super::{lock, ByteStream, Capabilities, StreamHandle};
use crate::config::{DEFAULT_BUFFER_STEP, DEFAULT_FRAME_SIZE};
use crate::error::{ProtocolError, Result};

pub struct BufferedStream {
    inner: StreamHandle,
    buffer: Mutex<Vec<u8>>,
    step: usize,
    frame_size: usize,
}

impl BufferedStream {
    pub fn new(inner: StreamHandle) -> Self {
        Self::with_sizes(inner, DEFAULT_BUFFER_STEP, DEFAULT_FRAME_SIZE)
    }

    /// Buffer whose capacity grows in multiples of `step` and which hands at
    /// most `frame_size` bytes to the inner stream per write
    pub fn with_sizes(inner: StreamHandle, step: usize, frame_size: usize) -> Self {
        Self {
            inner,
            buffer: Mutex::new(Vec::new()),
            step: step.max(1),
            frame_size: frame_size.max(1),
        }
    }

    /// Bytes waiting to be flushed
    pub fn pending(&self) -> Result<usize> {
        Ok(lock(&self.buffer)?.len())
    }

    pub fn capacity(&self) -> Result<usize> {
        Ok(lock(&self.buffer)?.capacity())
    }

    /// Copy of the unflushed bytes, front first
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(lock(&self.buffer)?.clone())
    }
}

impl ByteStream for BufferedStream {
    fn capabilities(&self) -> Capabilities {
        let inner = self.inner.capabilities();
        Capabilities {
            read: inner.read,
            peek: inner.peek,
            write: true,
            flush: true,
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf)
    }

    fn peek(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.peek(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut buffer = lock(&self.buffer)?;
        let needed = buffer.len() + buf.len();
        if needed > buffer.capacity() {
            let target = needed.div_ceil(self.step) * self.step;
            let additional = target - buffer.len();
            buffer.try_reserve_exact(additional)?;
        }
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&self) -> Result<usize> {
        let mut buffer = lock(&self.buffer)?;
        if buffer.is_empty() {
            return self.inner.flush();
        }

        let total = buffer.len();
        let mut sent = 0;
        let mut failure = None;
        while sent < total {
            let end = (sent + self.frame_size).min(total);
            match self.inner.write(&buffer[sent..end]) {
                Ok(0) | Err(ProtocolError::WouldBlock) => break,
                Ok(n) => sent += n,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        buffer.drain(..sent);
        trace!(sent, remaining = buffer.len(), "Flushed buffered bytes");

        if let Some(e) = failure {
            return Err(e);
        }
        if buffer.is_empty() {
            self.inner.flush()
        } else {
            Ok(buffer.len())
        }
    }
}
