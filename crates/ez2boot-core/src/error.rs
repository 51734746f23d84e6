//! Error types for `ez2boot` core library.

use thiserror::Error;

/// Result type alias using `ez2boot` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `ez2boot` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration string could not be parsed
    #[error("Invalid duration '{input}': {reason}")]
    Duration { input: String, reason: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
