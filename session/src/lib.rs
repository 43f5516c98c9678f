//! Server-side session core for CMD Chat.
//!
//! This crate owns everything between an accepted stream and a departed
//! client: the cryptographic handshake, the per-session dispatch loop, the
//! concurrent session registry with its room index, rate limiting, file
//! transfer tracking, and heartbeat liveness.
//!
//! One cooperative task runs per session. It is the only writer on its
//! stream and the only owner of the session's mutable state; other sessions
//! reach it exclusively through its bounded send queue.

#![warn(clippy::all)]

pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod rate;
pub mod registry;
pub mod session;
pub mod state;
pub mod transfer;

pub use dispatcher::run_session;
pub use error::SessionError;
pub use rate::RateLimiter;
pub use registry::SessionRegistry;
pub use session::{SendQueue, Session, SessionConfig};
pub use state::ServerState;
pub use transfer::{Transfer, TransferError, TransferTable};
