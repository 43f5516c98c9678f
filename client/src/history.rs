//! Optional encrypted transcript storage.
//!
//! The history file is an append-only sequence of frame-like records behind
//! a one-time salt header:
//!
//! ```text
//! salt(16) || ( u32_be len || nonce(12) || ciphertext || tag(16) )*
//! ```
//!
//! The key is derived from the user passphrase with PBKDF2-HMAC-SHA256.
//! Records that fail to decrypt on read are skipped rather than fatal, so a
//! transcript survives a partial final write.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use cmdchat_crypto::{derive_key, generate_salt, SessionCipher, PBKDF_SALT_SIZE};
use serde::{Deserialize, Serialize};

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// UTC unix milliseconds
    pub ts: i64,
    /// Room the line belonged to
    pub room: String,
    /// Display name of the sender (`system` for notices)
    pub sender: String,
    /// Line content
    pub text: String,
}

/// Append-only encrypted transcript writer.
pub struct History {
    file: File,
    cipher: SessionCipher,
}

impl History {
    /// Open (or create) a history file for appending.
    pub fn open(path: &Path, passphrase: &str) -> Result<Self> {
        let salt = match std::fs::metadata(path) {
            Ok(meta) if meta.len() >= PBKDF_SALT_SIZE as u64 => {
                let mut salt = [0u8; PBKDF_SALT_SIZE];
                File::open(path)
                    .and_then(|mut f| f.read_exact(&mut salt))
                    .with_context(|| format!("failed to read salt from {path:?}"))?;
                salt
            }
            _ => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .with_context(|| format!("failed to create {parent:?}"))?;
                    }
                }
                let salt = generate_salt();
                let mut file = File::create(path)
                    .with_context(|| format!("failed to create history file {path:?}"))?;
                file.write_all(&salt)?;
                salt
            }
        };

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open history file {path:?}"))?;

        Ok(Self {
            file,
            cipher: SessionCipher::new(derive_key(passphrase, &salt)),
        })
    }

    /// Encrypt and append one record.
    pub fn append(&mut self, record: &HistoryRecord) -> Result<()> {
        let plaintext = serde_json::to_vec(record)?;
        let sealed = self
            .cipher
            .seal(&plaintext)
            .map_err(|e| anyhow::anyhow!("history encryption failed: {e}"))?;
        self.file.write_all(&(sealed.len() as u32).to_be_bytes())?;
        self.file.write_all(&sealed)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Decrypt an entire history file. Undecryptable or truncated trailing
/// records are skipped.
pub fn read_all(path: &Path, passphrase: &str) -> Result<Vec<HistoryRecord>> {
    let raw = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    if raw.len() < PBKDF_SALT_SIZE {
        return Ok(Vec::new());
    }
    let (salt, mut rest) = raw.split_at(PBKDF_SALT_SIZE);
    let cipher = SessionCipher::new(derive_key(passphrase, salt));

    let mut records = Vec::new();
    while rest.len() >= 4 {
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            break;
        }
        let (sealed, tail) = rest.split_at(len);
        rest = tail;
        if let Ok(plaintext) = cipher.open(sealed) {
            if let Ok(record) = serde_json::from_slice(&plaintext) {
                records.push(record);
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> HistoryRecord {
        HistoryRecord {
            ts: 1_700_000_000_000,
            room: "lobby".to_string(),
            sender: "alice".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.chat");

        let mut history = History::open(&path, "hunter2").unwrap();
        history.append(&record("first")).unwrap();
        history.append(&record("second")).unwrap();
        drop(history);

        let records = read_all(&path, "hunter2").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "first");
        assert_eq!(records[1].text, "second");
    }

    #[test]
    fn test_reopen_appends_under_same_salt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.chat");

        History::open(&path, "pw").unwrap().append(&record("one")).unwrap();
        History::open(&path, "pw").unwrap().append(&record("two")).unwrap();

        let records = read_all(&path, "pw").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_wrong_passphrase_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.chat");

        let mut history = History::open(&path, "right").unwrap();
        history.append(&record("secret")).unwrap();
        drop(history);

        let records = read_all(&path, "wrong").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_truncated_tail_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.chat");

        let mut history = History::open(&path, "pw").unwrap();
        history.append(&record("whole")).unwrap();
        drop(history);

        // Simulate a crash mid-append
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(&[0u8; 10]);
        std::fs::write(&path, &raw).unwrap();

        let records = read_all(&path, "pw").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "whole");
    }
}
