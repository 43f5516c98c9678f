//! Session error taxonomy.
//!
//! Everything here is scoped to one session: the dispatcher logs the error
//! with sanitized context, terminates the session, and never lets it bubble
//! further.

use cmdchat_crypto::CryptoError;
use cmdchat_wire::WireError;
use thiserror::Error;

use crate::transfer::TransferError;

/// Fatal (or terminal) session conditions
#[derive(Error, Debug)]
pub enum SessionError {
    /// Malformed frame or envelope
    #[error("protocol: {0}")]
    Wire(#[from] WireError),

    /// Envelope legal on the wire but illegal in this state
    #[error("protocol: {0}")]
    Protocol(&'static str),

    /// Authenticated decryption failed
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    /// Token missing or rejected
    #[error("unauthorized")]
    Auth,

    /// File transfer constraint violated
    #[error("transfer: {0}")]
    Transfer(#[from] TransferError),

    /// Handshake deadline or heartbeat staleness
    #[error("timed out")]
    Timeout,

    /// Peer closed the stream
    #[error("connection closed")]
    Closed,

    /// Send queue overflowed beyond recovery
    #[error("send queue overflow")]
    Backpressure,

    /// Stream I/O failure
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this termination is part of normal operation (clean quit,
    /// ordinary disconnect) rather than a fault worth a warning.
    pub fn is_benign(&self) -> bool {
        matches!(self, SessionError::Closed)
    }
}
