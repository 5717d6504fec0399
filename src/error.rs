//! Error types for the read-tracking sync client

use thiserror::Error;

/// Sync client error
///
/// Only `MalformedUrl` is expected to reach callers of the read-state
/// operations; the remaining variants describe failures inside the
/// store, the connection factory, or a concrete backend, and are folded
/// into structured results before they cross the public API.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Input could not be parsed as a URL with a host
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Durable key-value store failed
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration is present but unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend connection could not be constructed
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Store(e.to_string())
    }
}

/// Result type for sync client operations
pub type Result<T> = std::result::Result<T, SyncError>;
