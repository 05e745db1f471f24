//! Error types
//!
//! Transport failures are recoverable and never escape the session layer;
//! validation failures are local and returned to the caller immediately.

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::peer::{MediaError, PeerError};
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl Error {
    /// Whether the failure should trigger a fallback or reconnection
    /// rather than being reported to the user
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Transport(_) | Error::Codec(_))
    }
}

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport cannot be used in this environment
    #[error("{0} transport unavailable")]
    Unavailable(&'static str),

    /// The transport has no way to carry this operation
    #[error("{operation} is not supported over {transport}")]
    Unsupported {
        transport: &'static str,
        operation: &'static str,
    },

    /// Operation requires an established connection
    #[error("not connected")]
    NotConnected,

    /// Connection attempt did not complete in time
    #[error("connect timed out")]
    Timeout,

    /// Reconnection gave up
    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// The remote end refused the request
    #[error("rejected by remote: {0}")]
    Rejected(String),
}

/// Relay frame encoding/decoding failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Local input validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message body is empty")]
    EmptyMessage,

    #[error("not joined to a room")]
    NoRoom,

    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}
