//! Client-side file transfer: paced outgoing chunks and inbound reassembly.
//!
//! Outgoing transfers are fed through the main loop one chunk at a time,
//! paced to stay under the server's rate window, so inbound traffic keeps
//! flowing during a long send. Inbound transfers reassemble in index order
//! and land in the user's download directory under a sanitized name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cmdchat_wire::{sanitize_filename, Envelope};
use tokio::time::{Duration, Instant};

/// Chunk payload size before base64 (32 KiB)
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Largest file the protocol accepts (10 MiB)
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Delay between outgoing chunks. Eleven chunks per five-second window stays
/// one under the server's rate cap, which also counts file chunks.
pub const CHUNK_PACING: Duration = Duration::from_millis(460);

/// An outgoing transfer being dripped into the send loop.
pub struct OutgoingFile {
    /// Transfer identifier announced in `file-start`
    pub transfer_id: String,
    filename: String,
    data: Vec<u8>,
    next_index: u32,
    total_chunks: u32,
    /// Earliest instant the next chunk may be sent
    pub next_at: Instant,
}

impl OutgoingFile {
    /// Read a file from disk and prepare it for sending.
    pub async fn load(path: &str, sender_name: &str) -> Result<Self, String> {
        let expanded = expand_home(path);
        let data = tokio::fs::read(&expanded)
            .await
            .map_err(|e| format!("cannot read {path}: {e}"))?;
        if data.is_empty() {
            return Err(format!("{path} is empty"));
        }
        if data.len() as u64 > MAX_FILE_SIZE {
            return Err(format!(
                "{path} is too large ({} bytes, max {MAX_FILE_SIZE})",
                data.len()
            ));
        }

        let filename = expanded
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed_file".to_string());
        let total_chunks = data.len().div_ceil(CHUNK_SIZE) as u32;
        let transfer_id = format!("{sender_name}-{filename}-{:08x}", rand::random::<u32>());

        Ok(Self {
            transfer_id,
            filename,
            data,
            next_index: 0,
            total_chunks,
            next_at: Instant::now(),
        })
    }

    /// The announcement envelope.
    pub fn start_envelope(&self) -> Envelope {
        Envelope::FileStart {
            transfer_id: self.transfer_id.clone(),
            sender: None,
            filename: self.filename.clone(),
            size: self.data.len() as u64,
            total_chunks: self.total_chunks,
        }
    }

    /// Next chunk envelope, or `None` when the transfer is finished. Updates
    /// the pacing deadline.
    pub fn next_chunk(&mut self) -> Option<Envelope> {
        if self.next_index >= self.total_chunks {
            return None;
        }
        let start = self.next_index as usize * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(self.data.len());
        let envelope = Envelope::FileChunk {
            transfer_id: self.transfer_id.clone(),
            sender: None,
            index: self.next_index,
            data: self.data[start..end].to_vec(),
        };
        self.next_index += 1;
        self.next_at = Instant::now() + CHUNK_PACING;
        Some(envelope)
    }

    /// Human-readable progress, printed every few chunks.
    pub fn progress(&self) -> Option<String> {
        if self.next_index == 0 || (self.next_index % 10 != 0 && self.next_index != self.total_chunks) {
            return None;
        }
        let pct = (self.next_index as f64 / self.total_chunks as f64) * 100.0;
        Some(format!(
            "[file] sending {}: {pct:.0}% ({}/{} chunks)",
            self.filename, self.next_index, self.total_chunks
        ))
    }

    /// Whether every chunk has been produced.
    pub fn is_done(&self) -> bool {
        self.next_index >= self.total_chunks
    }

    /// File name being sent.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Announced chunk count.
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }
}

struct Incoming {
    filename: String,
    total_size: u64,
    total_chunks: u32,
    next_index: u32,
    data: Vec<u8>,
}

/// Reassembly state for transfers arriving from the room.
#[derive(Default)]
pub struct IncomingTransfers {
    active: HashMap<String, Incoming>,
    download_dir: Option<PathBuf>,
}

impl IncomingTransfers {
    /// Track transfers, saving completed files under `download_dir` (the
    /// user's download directory by default).
    pub fn new(download_dir: Option<PathBuf>) -> Self {
        Self {
            active: HashMap::new(),
            download_dir,
        }
    }

    /// Handle a `file-start` announcement.
    pub fn start(&mut self, transfer_id: &str, filename: &str, size: u64, total_chunks: u32) {
        if size == 0 || size > MAX_FILE_SIZE || total_chunks == 0 {
            return;
        }
        self.active.insert(
            transfer_id.to_string(),
            Incoming {
                filename: sanitize_filename(filename),
                total_size: size,
                total_chunks,
                next_index: 0,
                data: Vec::with_capacity(size as usize),
            },
        );
    }

    /// Handle a `file-chunk`. Returns a progress line when one is due.
    pub fn chunk(&mut self, transfer_id: &str, index: u32, data: &[u8]) -> Option<String> {
        let unusable = {
            let incoming = self.active.get(transfer_id)?;
            index != incoming.next_index
                || incoming.data.len() as u64 + data.len() as u64 > incoming.total_size
        };
        if unusable {
            // The server enforces ordering and bounds; anything else here
            // means the transfer is unusable.
            self.active.remove(transfer_id);
            return Some(format!("[file] transfer {transfer_id} aborted"));
        }

        let incoming = self.active.get_mut(transfer_id)?;
        incoming.data.extend_from_slice(data);
        incoming.next_index += 1;

        if incoming.next_index % 10 == 0 && incoming.next_index < incoming.total_chunks {
            let pct = (incoming.next_index as f64 / incoming.total_chunks as f64) * 100.0;
            Some(format!(
                "[file] receiving {}: {pct:.0}% ({}/{} chunks)",
                incoming.filename, incoming.next_index, incoming.total_chunks
            ))
        } else {
            None
        }
    }

    /// Handle `file-end`: write the reassembled bytes to disk. Returns the
    /// saved path or an error line.
    pub async fn finish(&mut self, transfer_id: &str) -> Option<String> {
        let incoming = self.active.remove(transfer_id)?;
        let dir = self
            .download_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cmdchat");

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            return Some(format!("[file] cannot create {dir:?}: {e}"));
        }
        let target = unique_path(&dir, &incoming.filename).await;
        match tokio::fs::write(&target, &incoming.data).await {
            Ok(()) => Some(format!("[file] saved to {}", target.display())),
            Err(e) => Some(format!("[file] failed to save {}: {e}", target.display())),
        }
    }

    /// Transfers currently in flight.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no transfer is in flight.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

async fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !matches!(tokio::fs::try_exists(&candidate).await, Ok(true)) {
        return candidate;
    }
    for n in 1..1000 {
        let candidate = dir.join(format!("{n}-{filename}"));
        if !matches!(tokio::fs::try_exists(&candidate).await, Ok(true)) {
            return candidate;
        }
    }
    dir.join(filename)
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
