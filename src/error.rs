//! Error types for calcwire.
//!
//! [`WireError`] is the crate-wide error. Its variants mirror the failure
//! taxonomy of the service: everything except [`WireError::Io`] and
//! [`WireError::Frame`] is turned into an `ok:false` response envelope at the
//! dispatch or proxy boundary, and only socket-level failures end a session.

use thiserror::Error;

use crate::eval::EvalError;
use crate::protocol::FrameError;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum WireError {
    /// A frame could not be decoded into a request envelope.
    #[error("Malformed request: {0}")]
    Protocol(String),

    /// A required field is missing or has the wrong type.
    #[error("Bad request: {0}")]
    Validation(String),

    /// The expression evaluator rejected or failed to evaluate the input.
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    /// The text-generation backend failed.
    #[error("Generation error: {0}")]
    Backend(String),

    /// The proxy could not obtain a response from the upstream server.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Framing failure on a socket.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O failure on a socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WireError>;
