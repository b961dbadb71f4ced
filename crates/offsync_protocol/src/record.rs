//! Queued sync records.

use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of mutation carried by a [`SyncRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Lifecycle status of a [`SyncRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Waiting to be uploaded.
    Pending,
    /// Part of a batch that is in flight.
    Syncing,
    /// Accepted by the remote store.
    Completed,
    /// Last attempt failed.
    Failed,
    /// Remote store reported a divergent version.
    Conflict,
}

impl RecordStatus {
    /// Returns true if the lifecycle allows moving from `self` to `next`.
    ///
    /// `Syncing -> Pending` covers both a retryable per-record error and
    /// recovery of a batch interrupted by a crash.
    pub fn can_transition_to(self, next: RecordStatus) -> bool {
        use RecordStatus::*;

        matches!(
            (self, next),
            (Pending, Syncing)
                | (Syncing, Completed)
                | (Syncing, Failed)
                | (Syncing, Conflict)
                | (Syncing, Pending)
                | (Failed, Pending)
        )
    }

    /// Returns the lowercase name used on disk and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Syncing => "syncing",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
            RecordStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued mutation.
///
/// Records are created by the engine at enqueue time and move through
/// `pending -> syncing -> {completed | failed | conflict}`. A failed record
/// returns to `pending` while it has retry budget left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Unique record ID, generated at enqueue time.
    pub id: Uuid,
    /// Kind of mutation.
    pub operation: OperationKind,
    /// Domain type of the affected entity.
    pub entity_type: String,
    /// Identifier of the affected entity.
    pub entity_id: String,
    /// Serialized (optionally encrypted) mutation.
    pub payload: Payload,
    /// Enqueue time in milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Current lifecycle status.
    pub status: RecordStatus,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Diagnostic message from the last failure.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Device that produced the mutation.
    pub origin_device: String,
    /// User that produced the mutation.
    pub origin_user: String,
    /// Set when the remote store rejected the record as invalid.
    #[serde(default)]
    pub rejected: bool,
    /// Earliest time the record may be attempted again after a failure.
    #[serde(default)]
    pub next_attempt_at: Option<u64>,
}

impl SyncRecord {
    /// Creates a new pending record with a fresh ID.
    pub fn new(
        operation: OperationKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Payload,
        origin_device: impl Into<String>,
        origin_user: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            created_at,
            status: RecordStatus::Pending,
            retry_count: 0,
            last_error: None,
            origin_device: origin_device.into(),
            origin_user: origin_user.into(),
            rejected: false,
            next_attempt_at: None,
        }
    }

    /// Moves the record to `next`, enforcing the lifecycle.
    pub fn set_status(&mut self, next: RecordStatus) -> ProtocolResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProtocolError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Returns true if a failed record still has automatic retries left.
    pub fn is_retryable(&self, max_retries: u32) -> bool {
        self.status == RecordStatus::Failed && !self.rejected && self.retry_count < max_retries
    }

    /// Returns true if the record needs external intervention to proceed.
    pub fn is_terminal_failed(&self, max_retries: u32) -> bool {
        self.status == RecordStatus::Failed && (self.rejected || self.retry_count >= max_retries)
    }

    /// Returns true if the record can be attempted at `now`.
    pub fn is_ready(&self, now: u64, max_retries: u32) -> bool {
        let eligible = self.status == RecordStatus::Pending || self.is_retryable(max_retries);
        eligible && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Clears failure bookkeeping so the record is attempted afresh.
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
        self.rejected = false;
        self.next_attempt_at = None;
        self.last_error = None;
    }
}
