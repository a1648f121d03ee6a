//! Error types for the watch engine.
//!
//! The taxonomy drives retry behavior:
//! - [`Error::Transient`] - connectivity-class failure; the caller retries on
//!   the *next* scheduled cycle, never immediately.
//! - [`Error::Format`] - one malformed item; skipped and logged, the batch
//!   continues.
//! - [`Error::Config`] - fatal at startup; a misconfigured route refuses to
//!   start rather than being silently dropped.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while watching, dispatching and harvesting.
#[derive(Error, Debug)]
pub enum Error {
    /// Connectivity-class failure against an archive or sink. Retried on
    /// the next scheduled cycle.
    #[error("transient error: {0}")]
    Transient(String),

    /// Malformed or unexpected item payload. The item is skipped.
    #[error("format error: {0}")]
    Format(String),

    /// Invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not supported by this source or sink kind.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Core type error.
    #[error(transparent)]
    Core(#[from] gantry_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem watcher error.
    #[error("watch error: {0}")]
    Watch(String),

    /// Dispatch channel closed while events were pending.
    #[error("channel send error: {0}")]
    ChannelSend(String),
}

impl Error {
    /// Whether the failure is expected to clear on its own and should be
    /// retried on the next scheduled cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Io(_))
    }
}

impl From<notify::Error> for Error {
    fn from(e: notify::Error) -> Self {
        Error::Watch(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Transient("connection refused".into()).is_transient());
        assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).is_transient());
        assert!(!Error::Format("bad payload".into()).is_transient());
        assert!(!Error::Config("unknown sink".into()).is_transient());
    }

    #[test]
    fn display_carries_context() {
        let err = Error::Config("route 'pacs'/NEW_MATCH names unknown sink 'idx'".to_string());
        let msg = err.to_string();
        assert!(msg.contains("configuration error"));
        assert!(msg.contains("unknown sink"));
    }
}
