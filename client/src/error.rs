//! Error types for the sync client.

use thiserror::Error;

/// Boxed error returned by poll callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Engine error: {0}")]
    Engine(#[from] beacon_engine::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Failures of the push connection. All of them are retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("stream closed by server")]
    Closed,

    #[error("no connected frame within {0:?}")]
    ConnectTimeout(std::time::Duration),
}

/// Durable storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
