//! Error types for coldsync-core

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias using coldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in coldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Replication record (or other entity) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transition not allowed from the record's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An exclusive operation is already running
    #[error("Busy: {0}")]
    Busy(String),
}
