//! # Cipher Stream
//!
//! AES-128/CFB8 decorator. An encrypting stream transforms everything written
//! through it before handing it on; a decrypting stream transforms everything
//! read through it. One cipher state lives for the life of the stream.
//!
//! The encrypting side must sit above a layer that accepts whole writes
//! (normally a [`BufferedStream`](super::BufferedStream)). Once bytes have
//! passed through the cipher the state has advanced, so a partial or failed
//! write would desynchronise it from the peer; the stream then refuses all
//! further writes.

use std::sync::Mutex;

use tracing::{debug, warn};

use super::{lock, ByteStream, Capabilities, StreamHandle};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::CipherState;

const ERR_CIPHER_DESYNC: &str = "Cipher stream lost bytes after encryption";

struct CipherInner {
    state: CipherState,
    scratch: Vec<u8>,
    broken: bool,
}

pub struct CipherStream {
    inner: StreamHandle,
    cipher: Mutex<CipherInner>,
}

impl CipherStream {
    /// Stream that encrypts writes with `secret` as key and IV
    pub fn encrypting(inner: StreamHandle, secret: &[u8]) -> Result<Self> {
        Ok(Self::with_state(inner, CipherState::encryptor(secret)?))
    }

    /// Stream that decrypts reads with `secret` as key and IV
    pub fn decrypting(inner: StreamHandle, secret: &[u8]) -> Result<Self> {
        Ok(Self::with_state(inner, CipherState::decryptor(secret)?))
    }

    fn with_state(inner: StreamHandle, state: CipherState) -> Self {
        debug!(encrypting = state.is_encrypting(), "Cipher layer installed");
        Self {
            inner,
            cipher: Mutex::new(CipherInner {
                state,
                scratch: Vec::new(),
                broken: false,
            }),
        }
    }

    /// Decrypt bytes that were read from the inner stream before this layer
    /// existed, continuing the same cipher state
    pub fn decrypt_in_place(&self, data: &mut [u8]) -> Result<()> {
        let mut cipher = lock(&self.cipher)?;
        if cipher.state.is_encrypting() {
            return Err(ProtocolError::Unsupported(constants::ERR_NOT_READABLE));
        }
        cipher.state.apply(data);
        Ok(())
    }
}

impl ByteStream for CipherStream {
    fn capabilities(&self) -> Capabilities {
        let encrypting = lock(&self.cipher)
            .map(|c| c.state.is_encrypting())
            .unwrap_or(false);
        let inner = self.inner.capabilities();
        if encrypting {
            Capabilities {
                write: inner.write,
                flush: inner.flush,
                ..Capabilities::default()
            }
        } else {
            Capabilities {
                read: inner.read,
                ..Capabilities::default()
            }
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut cipher = lock(&self.cipher)?;
        if cipher.state.is_encrypting() {
            return Err(ProtocolError::Unsupported(constants::ERR_NOT_READABLE));
        }
        let n = self.inner.read(buf)?;
        cipher.state.apply(&mut buf[..n]);
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut guard = lock(&self.cipher)?;
        let cipher = &mut *guard;
        if !cipher.state.is_encrypting() {
            return Err(ProtocolError::Unsupported(constants::ERR_NOT_WRITABLE));
        }
        if cipher.broken {
            return Err(ProtocolError::InvalidState(ERR_CIPHER_DESYNC));
        }

        cipher.scratch.clear();
        cipher.scratch.try_reserve(buf.len())?;
        cipher.scratch.extend_from_slice(buf);
        cipher.state.apply(&mut cipher.scratch);

        match self.inner.write(&cipher.scratch) {
            Ok(n) if n == buf.len() => Ok(n),
            Ok(n) => {
                warn!(accepted = n, offered = buf.len(), "Partial write below cipher layer");
                cipher.broken = true;
                Err(ProtocolError::InvalidState(ERR_CIPHER_DESYNC))
            }
            Err(e) => {
                cipher.broken = true;
                Err(e)
            }
        }
    }

    fn flush(&self) -> Result<usize> {
        self.inner.flush()
    }
}
