//! Error types for relayprobe wire handling.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or addressing store data.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Path was empty or contained an empty segment
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// Frame exceeds the configured maximum size
    #[error("frame too large: {size} bytes (limit: {limit} bytes)")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::InvalidPath("test//data".into());
        assert_eq!(err.to_string(), "invalid path: \"test//data\"");

        let err = WireError::FrameTooLarge { size: 10, limit: 5 };
        assert_eq!(err.to_string(), "frame too large: 10 bytes (limit: 5 bytes)");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
