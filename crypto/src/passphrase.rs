//! Passphrase-derived keys for the client history file.

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::cipher::AES_KEY_SIZE;

/// Salt size for history key derivation
pub const PBKDF_SALT_SIZE: usize = 16;

/// PBKDF2 iteration count
pub const PBKDF_ITERATIONS: u32 = 200_000;

/// Generate a random salt.
pub fn generate_salt() -> [u8; PBKDF_SALT_SIZE] {
    let mut salt = [0u8; PBKDF_SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a symmetric key from a passphrase with PBKDF2-HMAC-SHA256.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; AES_KEY_SIZE] {
    let mut key = [0u8; AES_KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF_ITERATIONS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionCipher;

    #[test]
    fn test_derivation_is_deterministic() {
        let salt = [3u8; PBKDF_SALT_SIZE];
        assert_eq!(derive_key("hunter2", &salt), derive_key("hunter2", &salt));
    }

    #[test]
    fn test_passphrase_and_salt_matter() {
        let salt = generate_salt();
        let other_salt = generate_salt();
        assert_ne!(derive_key("a", &salt), derive_key("b", &salt));
        assert_ne!(derive_key("a", &salt), derive_key("a", &other_salt));
    }

    #[test]
    fn test_derived_key_drives_cipher() {
        let salt = generate_salt();
        let writer = SessionCipher::new(derive_key("correct horse", &salt));
        let reader = SessionCipher::new(derive_key("correct horse", &salt));

        let sealed = writer.seal(b"transcript line").unwrap();
        assert_eq!(reader.open(&sealed).unwrap(), b"transcript line");

        let stranger = SessionCipher::new(derive_key("wrong", &salt));
        assert!(stranger.open(&sealed).is_err());
    }
}
