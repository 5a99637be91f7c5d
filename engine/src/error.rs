//! Error types for the Beacon engine.

use thiserror::Error;

/// All possible errors from the Beacon engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Wire errors
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("malformed payload in '{event}' frame: {reason}")]
    MalformedPayload { event: String, reason: String },

    #[error("unknown frame: {0}")]
    UnknownFrame(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("unsupported schema version: {0}")]
    UnsupportedSchemaVersion(String),
}

impl Error {
    /// Whether this error came from decoding an inbound frame.
    ///
    /// Parse errors are always dropped by the receiver, never fatal.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidFrame(_) | Error::MalformedPayload { .. } | Error::UnknownFrame(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
