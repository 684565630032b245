//! # Errors
//!
//! Error types used throughout the library, layered from the wire protocol
//! up to the process boundary, the same way a malformed byte becomes a
//! closed connection becomes (at worst) a non-zero exit code.

use thiserror::Error;

/// Errors raised while decoding a single RESP command frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("expected '*' or a verb byte, got {0:#x}")]
    BadPrefix(u8),

    #[error("array count must be a non-negative integer: {0}")]
    BadArrayCount(String),

    #[error("array count must be >= 1 for the array form")]
    EmptyArray,

    #[error("expected '$' introducing a bulk string, got {0:#x}")]
    MissingBulkMarker(u8),

    #[error("bulk string length is not a valid non-negative integer: {0}")]
    BadBulkLength(String),

    #[error("line is not terminated by CRLF")]
    MissingCrlf,

    #[error("verb is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors raised by a [`crate::backend::BackendSession`] call.
///
/// The dispatcher deliberately does not distinguish these kinds when
/// translating a failure into a [`crate::resp::Reply`]; they are kept
/// distinct here only so they can be logged usefully.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("key not found")]
    NotFound,

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("backend returned an error reply: {0}")]
    Remote(String),

    #[error("backend call cancelled")]
    Cancelled,
}

/// Errors the dispatcher can produce while interpreting a [`crate::resp::Command`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unsupported command '{0}'")]
    UnsupportedCommand(String),

    #[error("wrong number of arguments for '{0}'")]
    WrongArity(String),

    #[error("invalid option {0}")]
    InvalidOption(String),
}

/// Errors surfaced at the per-connection boundary.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level application errors, the only kind allowed to escalate to
/// process exit.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
