//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in persistence or encryption adapters.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A collection could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A stored collection could not be read back.
    #[error("stored data corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store's writer lock.
    #[error("store at {0} is locked by another writer")]
    Locked(PathBuf),

    /// Encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The adapter refused the write (used by test doubles).
    #[error("write rejected: {0}")]
    Rejected(String),
}
