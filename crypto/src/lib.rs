//! Cryptographic primitives for CMD Chat.
//!
//! Two primitives make up the session security model: an RSA-2048-OAEP key
//! wrap that delivers a fresh symmetric key during the handshake, and an
//! AES-256-GCM session cipher used for every envelope afterwards. A PBKDF2
//! derivation supports the client's encrypted history file.
//!
//! Session keys never leave this crate unwrapped and are zeroized on drop.

#![warn(clippy::all)]

pub mod cipher;
pub mod error;
pub mod keywrap;
pub mod passphrase;

pub use cipher::{SessionCipher, AES_KEY_SIZE, AES_NONCE_SIZE, AES_TAG_SIZE};
pub use error::CryptoError;
pub use keywrap::{KeyPair, PublicKey, RSA_KEY_BITS};
pub use passphrase::{derive_key, generate_salt, PBKDF_ITERATIONS, PBKDF_SALT_SIZE};
