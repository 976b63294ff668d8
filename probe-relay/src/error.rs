//! Error types for relayprobe-relay.

use std::path::PathBuf;

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored node could not be encoded or decoded.
    #[error("node encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Per-connection errors. Reported to the client as `error` frames.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The frame could not be decoded.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] relayprobe_types::WireError),

    /// A relay-to-client frame was sent by the client.
    #[error("unexpected frame type: {0}")]
    UnexpectedFrame(&'static str),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {0}")]
    RateLimited(#[from] crate::limits::RateLimitError),

    /// Binary frames are not part of the protocol.
    #[error("binary frames are not supported")]
    BinaryFrame,
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;
