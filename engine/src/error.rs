//! Unified error types for the engine
//!
//! `EngineError` is what every public operation returns. It is cloneable and
//! serializable so a coalesced sync pass can hand the same outcome to every
//! caller, and so the API layer can forward it unchanged.
//!
//! Errors coming back from the mailbox provider are kept as
//! [`ProviderError`] until they have been classified (see `classify.rs`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine error type for operations and background tasks
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Email not found: {0}")]
    EmailNotFound(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Nothing to restore for email {0}")]
    NothingToRestore(String),

    #[error("No sync anchor for user {0}")]
    NoSyncAnchor(String),

    #[error("Reconciliation queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

/// Error reported by the mailbox provider client.
///
/// Carries the HTTP-like status code when there is one, and the provider's
/// message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", display_provider_error(.status, .message))]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

fn display_provider_error(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("{} ({})", message, code),
        None => message.to_string(),
    }
}

impl ProviderError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Error without a status code (network reset, client-side timeout...)
    pub fn without_status(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        EngineError::Provider(err)
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(err: r2d2::Error) -> Self {
        EngineError::Database(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Database(format!("Invalid stored JSON: {}", err))
    }
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::new(404, "Requested entity was not found.");
        assert_eq!(err.to_string(), "Requested entity was not found. (404)");

        let err = ProviderError::without_status("connection reset by peer");
        assert_eq!(err.to_string(), "connection reset by peer");
    }

    #[test]
    fn test_engine_error_serializes_tagged() {
        let err = EngineError::ColumnNotFound("col-1".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"type":"ColumnNotFound","message":"col-1"}"#);
    }
}
