//! Error types for the federation log engine

use thiserror::Error;

/// Result type alias using the fedlog Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the federation log
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from storage operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LMDB/heed database errors
    #[error("Database error: {0}")]
    Database(#[from] heed::Error),

    /// Local persistence failed; no state change was made
    #[error("Storage error: {0}")]
    Storage(String),

    /// Log record absent (purged or never written)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient RPC-layer failure, absorbed by retry/backoff
    #[error("Network error: {0}")]
    Network(String),

    /// Command execution against the underlying store failed
    #[error("Apply error: {0}")]
    Apply(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create an apply error
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
