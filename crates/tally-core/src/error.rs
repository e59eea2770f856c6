//! Error types for tally-core

use thiserror::Error;

/// Result type alias using tally-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing a value would exceed the local storage budget
    #[error("Storage quota exceeded writing {key}: {needed} bytes needed, budget is {budget}")]
    QuotaExceeded {
        key: String,
        needed: u64,
        budget: u64,
    },

    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote store answered with a failure or an unusable body
    #[error("Sync transport error: {0}")]
    Transport(String),

    /// Remote call did not finish in time
    #[error("Sync request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Sync requested without an active session
    #[error("No active session; sign in before syncing")]
    NotSignedIn,
}

impl Error {
    /// Whether the error came from the local storage budget.
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}
