//! Export error types.

use crate::transport::TransportError;
use thiserror::Error;

/// Error type for the export pipeline.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The replay queue's lock or backing file could not be acquired.
    #[error("replay queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Settings error
    #[error("settings error: {0}")]
    Config(#[from] starlog_config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid collector URL
    #[error("invalid collector URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Upload failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type alias using ExportError.
pub type ExportResult<T> = Result<T, ExportError>;
