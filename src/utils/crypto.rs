//! AES-128 in CFB8 mode, the session's symmetric stream cipher.
//!
//! Key and IV are both the 16-byte shared secret agreed during login. Each
//! direction keeps one cipher state for the life of the session; the state
//! carries across frames and is never reset or re-keyed.

use aes::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;

use crate::error::{ProtocolError, Result};

pub type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
pub type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;

/// Length of the shared secret (AES-128 key)
pub const SHARED_SECRET_LEN: usize = 16;

/// CFB8 processes one byte per cipher step
pub const CIPHER_BLOCK_SIZE: usize = 1;

/// Cipher state for one direction of a session
pub enum CipherState {
    Encrypt(Box<Aes128Cfb8Enc>),
    Decrypt(Box<Aes128Cfb8Dec>),
}

impl CipherState {
    /// Outbound state for the given shared secret
    ///
    /// # Errors
    /// Returns `ProtocolError::EncryptionFailure` if the secret is not 16 bytes
    pub fn encryptor(secret: &[u8]) -> Result<Self> {
        Aes128Cfb8Enc::new_from_slices(secret, secret)
            .map(|cipher| CipherState::Encrypt(Box::new(cipher)))
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    /// Inbound state for the given shared secret
    pub fn decryptor(secret: &[u8]) -> Result<Self> {
        Aes128Cfb8Dec::new_from_slices(secret, secret)
            .map(|cipher| CipherState::Decrypt(Box::new(cipher)))
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    pub fn is_encrypting(&self) -> bool {
        matches!(self, CipherState::Encrypt(_))
    }

    /// Run `data` through the cipher in place, advancing the state
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            CipherState::Encrypt(cipher) => {
                for byte in data.iter_mut() {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(
                        byte,
                    )));
                }
            }
            CipherState::Decrypt(cipher) => {
                for byte in data.iter_mut() {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(
                        byte,
                    )));
                }
            }
        }
    }
}
