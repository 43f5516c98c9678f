//! RSA-2048-OAEP key wrap for the session handshake.
//!
//! The client generates a keypair per connection attempt and sends the PEM
//! public key in its `hello`. The server wraps a fresh 32-byte session key
//! against it; only the matching private key can recover it.

use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::cipher::AES_KEY_SIZE;
use crate::CryptoError;

/// Required RSA modulus size in bits
pub const RSA_KEY_BITS: usize = 2048;

/// An RSA keypair with its PEM-encoded public half.
pub struct KeyPair {
    private: RsaPrivateKey,
    public_pem: String,
}

impl KeyPair {
    /// Generate a fresh 2048-bit keypair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|_| CryptoError::KeyGen)?;
        let public_pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| CryptoError::KeyGen)?;
        Ok(Self {
            private,
            public_pem,
        })
    }

    /// PEM (SPKI) encoding of the public key, as sent in `hello`.
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// Recover a wrapped session key.
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<[u8; AES_KEY_SIZE], CryptoError> {
        let mut plain = self
            .private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CryptoError::Unwrap)?;
        if plain.len() != AES_KEY_SIZE {
            plain.zeroize();
            return Err(CryptoError::Unwrap);
        }
        let mut key = [0u8; AES_KEY_SIZE];
        key.copy_from_slice(&plain);
        plain.zeroize();
        Ok(key)
    }
}

/// A peer's public key, validated to the required modulus size.
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parse a PEM (SPKI) public key. Rejects anything that is not RSA with
    /// a 2048-bit modulus.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem).map_err(|_| CryptoError::BadPublicKey)?;
        if key.size() * 8 != RSA_KEY_BITS {
            return Err(CryptoError::BadPublicKey);
        }
        Ok(Self(key))
    }

    /// Wrap a session key for the holder of the matching private key.
    pub fn wrap_key(&self, key: &[u8; AES_KEY_SIZE]) -> Result<Vec<u8>, CryptoError> {
        let mut rng = rand::thread_rng();
        self.0
            .encrypt(&mut rng, Oaep::new::<Sha256>(), key)
            .map_err(|_| CryptoError::Wrap)
    }
}
