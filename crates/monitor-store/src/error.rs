//! Error types for monitor-store.

use std::path::PathBuf;

/// Result type for monitor-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in monitor-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No account with this name or token.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Collection name not recognized.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
