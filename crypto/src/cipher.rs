//! AES-256-GCM session cipher.
//!
//! Every seal draws a fresh random 96-bit nonce and emits
//! `nonce || ciphertext || tag` as the frame payload. Open fails closed: a
//! bad tag is an error and the caller must terminate the session. Random
//! nonces are acceptable at the per-session message volumes of this
//! protocol; the key never spans sessions.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::CryptoError;

/// Symmetric key size in bytes (AES-256)
pub const AES_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes
pub const AES_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes
pub const AES_TAG_SIZE: usize = 16;

/// Per-session authenticated cipher. The key copy held here is zeroized on
/// drop.
pub struct SessionCipher {
    key: [u8; AES_KEY_SIZE],
    cipher: Aes256Gcm,
}

impl SessionCipher {
    /// Build a cipher around an existing key.
    pub fn new(key: [u8; AES_KEY_SIZE]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self { key, cipher }
    }

    /// Generate a fresh random session key and its cipher.
    pub fn generate() -> Self {
        let mut key = [0u8; AES_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Raw key bytes, for the handshake wrap only.
    pub fn key_bytes(&self) -> &[u8; AES_KEY_SIZE] {
        &self.key
    }

    /// Encrypt a plaintext into `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; AES_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Decrypt)?;

        let mut out = Vec::with_capacity(AES_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext || tag` payload.
    pub fn open(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() < AES_NONCE_SIZE + AES_TAG_SIZE {
            return Err(CryptoError::Truncated);
        }
        let (nonce, ciphertext) = payload.split_at(AES_NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

impl Drop for SessionCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
