//! Engine-wide error type.
//!
//! Every fallible path in the engine returns [`Result`]. Variants are
//! grouped by subsystem so call sites can wrap context with `format!`
//! without losing the originating layer.

use thiserror::Error;

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("recording state error: {0}")]
    InvalidState(String),

    #[error("marker unavailable: {0}")]
    MarkerUnavailable(String),

    #[error("html capture failed: {0}")]
    HtmlCaptureFailed(String),

    #[error("video failed: {0}")]
    VideoFailed(String),

    #[error("storage failed: {0}")]
    StorageFailed(String),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("ingest rejected request: {0}")]
    IngestRejected(String),

    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// True when a retry against the same endpoint may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Http(_) | EngineError::Timeout(_) | EngineError::UploadFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_subsystem() {
        let err = EngineError::StorageFailed("disk full".to_string());
        assert_eq!(err.to_string(), "storage failed: disk full");
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Timeout("ack").is_transient());
        assert!(!EngineError::ConfigError("bad".into()).is_transient());
    }
}
