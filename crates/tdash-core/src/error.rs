//! Error types for tdash-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Invalid stream URL: {0}")]
    InvalidStreamUrl(String),

    #[error("Missing query parameter '{param}' in {url}")]
    MissingParam { param: &'static str, url: String },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
