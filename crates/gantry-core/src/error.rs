//! Error types shared across Gantry components.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core type handling.
#[derive(Error, Debug)]
pub enum Error {
    /// An item level string did not match any known level.
    #[error("unknown item level: {0}")]
    UnknownLevel(String),

    /// A metadata timestamp could not be parsed.
    #[error("invalid timestamp in field '{field}': {reason}")]
    InvalidTimestamp {
        /// The metadata field holding the bad value.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
