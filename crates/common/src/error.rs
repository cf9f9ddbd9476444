//! Error types for the WireGuard console

use thiserror::Error;

/// Result type alias using the console Error
pub type Result<T> = std::result::Result<T, Error>;

/// WireGuard console error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("External command failed: {0}")]
    CommandFailed(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
