//! Error types for the sync engine.

use offsync_protocol::{ProtocolError, Uuid};
use offsync_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The endpoint could not be reached or answered unusably.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The input or the remote store rejected the data as invalid.
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote store holds a divergent version of the entity.
    #[error("conflict on {entity_type}/{entity_id}")]
    Conflict {
        /// Domain type of the entity.
        entity_type: String,
        /// Identifier of the entity.
        entity_id: String,
    },

    /// The persistence adapter failed to store state.
    #[error("persistence failed after {attempts} attempt(s): {source}")]
    Persistence {
        /// Write attempts made.
        attempts: u32,
        /// Last adapter error.
        #[source]
        source: StorageError,
    },

    /// The device is offline.
    #[error("device is offline")]
    Offline,

    /// A batch upload exceeded its time budget.
    #[error("batch upload timed out after {0:?}")]
    Timeout(Duration),

    /// A payload or message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// A payload could not be encrypted or decrypted.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// No pending conflict has the given ID.
    #[error("no pending conflict with id {0}")]
    ConflictNotFound(Uuid),
}

impl SyncError {
    /// Creates a transient network error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork(message.into())
    }

    /// Wraps an adapter error from a single write attempt.
    pub fn persistence(source: StorageError) -> Self {
        Self::Persistence {
            attempts: 1,
            source,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientNetwork(_) | SyncError::Timeout(_) | SyncError::Persistence { .. }
        )
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Encryption(message) => SyncError::Encryption(message),
            other => SyncError::persistence(other),
        }
    }
}
