//! Error types for kvlog
//!
//! Provides a unified error type for all operations. Absence of a key is the
//! only condition with a distinguished variant; everything else carries the
//! underlying cause.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using KvlogError
pub type Result<T> = std::result::Result<T, KvlogError>;

/// Unified error type for kvlog operations
#[derive(Debug, Error)]
pub enum KvlogError {
    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------
    /// The requested key does not exist.
    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Failed to open store at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Box<KvlogError>,
    },

    #[error("Store directory {} is locked by another handle", .0.display())]
    Locked(PathBuf),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KvlogError {
    /// True when this error reports an absent key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvlogError::KeyNotFound)
    }

    /// Wrap an error raised while opening the store at `path`.
    pub(crate) fn open(path: impl Into<PathBuf>, source: KvlogError) -> Self {
        KvlogError::Open {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

impl From<bincode::Error> for KvlogError {
    fn from(e: bincode::Error) -> Self {
        KvlogError::Serialization(e.to_string())
    }
}
