use std::io;

use thiserror::Error;

/// Protocol-level and I/O failures of the framed stream codec.
///
/// Any variant here is, per spec.md §7, non-recoverable for the current
/// connection: the owning session or proxy tears the connection down.
#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("short read: expected {expected} bytes, stream closed after {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u32),

    #[error("length prefix {0} out of range")]
    LengthOutOfRange(i64),

    #[error("malformed textual float field: {0:?}")]
    MalformedFloat(String),

    #[error("expected response {expected:?}, got {actual:?}")]
    UnexpectedResponse { expected: &'static str, actual: String },

    #[error("read attempted before a frame was corked in with get_cork()")]
    NoActiveFrame,
}
