//! Crypto error types.

use thiserror::Error;

/// Cryptographic failures
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Public key failed to parse or has the wrong modulus size
    #[error("unusable public key")]
    BadPublicKey,

    /// Key generation failed
    #[error("key generation failed")]
    KeyGen,

    /// RSA-OAEP wrap failed
    #[error("key wrap failed")]
    Wrap,

    /// RSA-OAEP unwrap failed or produced a key of the wrong size
    #[error("key unwrap failed")]
    Unwrap,

    /// AEAD payload too short to carry a nonce and tag
    #[error("ciphertext too short")]
    Truncated,

    /// AEAD tag verification failed
    #[error("decryption failed")]
    Decrypt,
}
