//! Wire protocol framing, envelope codec, and input sanitization for CMD Chat.
//!
//! This crate provides the shared protocol layer used by both the server and
//! the client: length-prefixed framing over a byte stream, the text envelope
//! codec, and the sanitization rules applied to user-supplied identifiers.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+------------------------------+
//! | u32 length (BE)      | payload byte count (<= 64Ki) |
//! +----------------------+------------------------------+
//! | payload              | plaintext envelope, or       |
//! |                      | nonce(12) || ciphertext||tag |
//! +----------------------+------------------------------+
//! ```
//!
//! An envelope is a UTF-8 block of newline-delimited `key=value` records
//! terminated by an empty line. The `type` key comes first. Values escape
//! backslash and newline; binary fields are base64.

#![warn(clippy::all)]

pub mod envelope;
pub mod error;
pub mod frame;
pub mod sanitize;

pub use envelope::{Envelope, ErrorCode};
pub use error::WireError;
pub use frame::{decode_frame, recv_frame, write_frame, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
pub use sanitize::{
    mask_token, sanitize_filename, sanitize_name, sanitize_room, sanitize_text, DEFAULT_NAME,
    DEFAULT_ROOM, MAX_TEXT_BYTES,
};
