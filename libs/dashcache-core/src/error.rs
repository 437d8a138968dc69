//! Error types for the dashcache core library

use thiserror::Error;

/// Result type alias for dashcache operations
pub type Result<T> = std::result::Result<T, DashcacheError>;

/// Main error type for dashcache operations
#[derive(Error, Debug)]
pub enum DashcacheError {
    #[error("Dataset fetch failed: {message}")]
    FetchFailed { message: String },

    #[error("Dataset fetch timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DashcacheError {
    /// Create a fetch failure error
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::FetchFailed {
            message: message.into(),
        }
    }

    /// Create a timeout error from the elapsed budget
    #[must_use]
    pub fn timeout(elapsed: std::time::Duration) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = elapsed.as_millis() as u64;
        Self::Timeout { elapsed_ms }
    }

    /// Create an invalid query error
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error belongs to the fetch-failure class (source error or timeout)
    #[must_use]
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::FetchFailed { .. } | Self::Timeout { .. })
    }
}

impl From<anyhow::Error> for DashcacheError {
    fn from(err: anyhow::Error) -> Self {
        // `{:#}` keeps the whole context chain on one line
        Self::fetch_failed(format!("{err:#}"))
    }
}
