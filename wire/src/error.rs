//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Stream ended inside a length prefix or payload
    #[error("truncated frame")]
    Truncated,

    /// Frame length outside the accepted range
    #[error("frame size out of range: {0}")]
    Size(usize),

    /// Envelope payload is not valid UTF-8
    #[error("envelope is not utf-8")]
    Utf8,

    /// Envelope structure could not be parsed
    #[error("malformed envelope")]
    Malformed,

    /// Envelope carries a type tag outside the closed set
    #[error("unknown envelope type `{0}`")]
    UnknownType(String),

    /// Required field absent
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// Field present but unparseable
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),

    /// Underlying stream failure
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
