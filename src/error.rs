//! Error types for shardstore
//!
//! Provides a unified error type for all operations.
//!
//! Expected data-level conditions (`NotFound`, `DuplicateKey`) are ordinary
//! variants the caller branches on; structural index corruption is recovered
//! internally via rebuild and never crosses the public boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for shardstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Data-Level Conditions
    // -------------------------------------------------------------------------
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record id: {0}")]
    DuplicateKey(String),

    #[error("invalid record id {0:?}: ids need at least 2 characters and no path separators")]
    InvalidId(String),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("integrity check failed for {id}: stored hash {actual} != expected {expected}")]
    IntegrityCheckFailed { id: String, expected: u32, actual: u32 },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Attach the path being touched to a bare IO error
    pub(crate) fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
        let path = path.into();
        move |source| StoreError::IoAt { path, source }
    }
}
