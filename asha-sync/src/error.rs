//! Error types for the sync engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No owner could be resolved for a remote write. Entries failing with
    /// this error go back to `pending` instead of `failed`.
    #[error("NO_AUTH: no authenticated principal available")]
    NoAuth,

    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// True for the authentication-absent condition (`NO_AUTH`)
    pub fn is_no_auth(&self) -> bool {
        matches!(self, SyncError::NoAuth)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_auth_is_distinguished() {
        assert!(SyncError::NoAuth.is_no_auth());
        assert!(SyncError::NoAuth.to_string().starts_with("NO_AUTH"));
        assert!(!SyncError::Remote("boom".to_string()).is_no_auth());
    }
}
