//! Relay-only tracking of in-progress file transfers.
//!
//! The server never retains chunk content; each transfer carries just enough
//! bookkeeping to enforce its announced bounds while the chunks are relayed.
//! Index gaps, duplicates, and byte-budget violations are fatal to the
//! session.

use std::collections::HashMap;
use thiserror::Error;

/// Hard cap on an announced file size (10 MiB)
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Transfer constraint violations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransferError {
    /// Announced size is zero or above the cap
    #[error("file size {0} outside accepted range")]
    Size(u64),

    /// Announced chunk count is zero
    #[error("chunk count must be positive")]
    NoChunks,

    /// A transfer with this id is already active for the session
    #[error("transfer id already active")]
    Duplicate,

    /// Chunk for an id the session never started
    #[error("unknown transfer id")]
    Unknown,

    /// Chunk index does not follow the previous one
    #[error("chunk index {got} where {expected} was expected")]
    OutOfOrder {
        /// Next index the tracker would accept
        expected: u32,
        /// Index actually received
        got: u32,
    },

    /// Accumulated bytes exceed the announced size
    #[error("received bytes exceed announced size")]
    ByteBudget,
}

/// Bookkeeping for one inbound transfer
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    /// Original file name, as announced
    pub filename: String,
    /// Announced total size in bytes
    pub total_size: u64,
    /// Announced chunk count
    pub total_chunks: u32,
    next_index: u32,
    received_bytes: u64,
}

impl Transfer {
    /// Chunks accepted so far.
    pub fn received_chunks(&self) -> u32 {
        self.next_index
    }

    /// Bytes accepted so far.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }
}

/// Per-session table of active transfers
#[derive(Debug)]
pub struct TransferTable {
    max_file_size: u64,
    active: HashMap<String, Transfer>,
}

impl Default for TransferTable {
    fn default() -> Self {
        Self::new(MAX_FILE_SIZE)
    }
}

impl TransferTable {
    /// Create an empty table accepting announcements up to `max_file_size`.
    pub fn new(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            active: HashMap::new(),
        }
    }

    /// Register a transfer announced by `file-start`.
    pub fn start(
        &mut self,
        transfer_id: &str,
        filename: &str,
        total_size: u64,
        total_chunks: u32,
    ) -> Result<(), TransferError> {
        if total_size == 0 || total_size > self.max_file_size {
            return Err(TransferError::Size(total_size));
        }
        if total_chunks == 0 {
            return Err(TransferError::NoChunks);
        }
        if self.active.contains_key(transfer_id) {
            return Err(TransferError::Duplicate);
        }
        self.active.insert(
            transfer_id.to_string(),
            Transfer {
                filename: filename.to_string(),
                total_size,
                total_chunks,
                next_index: 0,
                received_bytes: 0,
            },
        );
        Ok(())
    }

    /// Account for one chunk. Returns the finished [`Transfer`] when the
    /// final index arrives, `None` while the transfer is still in flight.
    pub fn chunk(
        &mut self,
        transfer_id: &str,
        index: u32,
        len: usize,
    ) -> Result<Option<Transfer>, TransferError> {
        let transfer = self
            .active
            .get_mut(transfer_id)
            .ok_or(TransferError::Unknown)?;

        if index != transfer.next_index {
            return Err(TransferError::OutOfOrder {
                expected: transfer.next_index,
                got: index,
            });
        }

        transfer.received_bytes += len as u64;
        if transfer.received_bytes > transfer.total_size {
            return Err(TransferError::ByteBudget);
        }
        transfer.next_index += 1;

        if index == transfer.total_chunks - 1 {
            return Ok(self.active.remove(transfer_id));
        }
        Ok(None)
    }

    /// Number of transfers in flight.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no transfer is in flight.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
