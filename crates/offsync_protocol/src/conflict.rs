//! Conflict records and resolution strategies.

use crate::payload::Document;
use crate::record::OperationKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Policy used to pick a winning representation for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The remote version is kept verbatim.
    ServerWins,
    /// The local version is kept verbatim.
    ClientWins,
    /// Entity-type-specific or field-wise merge.
    Merge,
    /// Resolution is deferred to an external decision-maker.
    Manual,
}

impl ConflictStrategy {
    /// Returns true if this strategy resolves conflicts without outside input.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictStrategy::Manual)
    }

    /// Returns the snake_case name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::ServerWins => "server_wins",
            ConflictStrategy::ClientWins => "client_wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::ServerWins
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a [`ConflictRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    /// Waiting for resolution.
    Pending,
    /// A resolved payload has been computed and re-queued.
    Resolved,
    /// Dismissed without re-queuing anything.
    Ignored,
}

/// A detected divergence between local and remote state for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique conflict ID.
    pub id: Uuid,
    /// ID of the queued record whose upload raised the conflict.
    pub record_id: Uuid,
    /// Operation of that record.
    pub operation: OperationKind,
    /// Domain type of the entity.
    pub entity_type: String,
    /// Identifier of the entity.
    pub entity_id: String,
    /// Local version (decrypted and decoded).
    pub local_payload: Document,
    /// Version held by the remote store.
    pub remote_payload: Document,
    /// When the local version was produced (ms since epoch).
    pub local_timestamp: u64,
    /// When the conflict was reported by the remote store (ms since epoch).
    pub remote_timestamp: u64,
    /// Strategy in effect when the conflict was raised.
    pub strategy: ConflictStrategy,
    /// Winning representation, once resolved.
    #[serde(default)]
    pub resolved_payload: Option<Document>,
    /// Lifecycle status.
    pub status: ConflictStatus,
}

impl ConflictRecord {
    /// Creates a new pending conflict.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        record_id: Uuid,
        operation: OperationKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        local_payload: Document,
        remote_payload: Document,
        local_timestamp: u64,
        remote_timestamp: u64,
        strategy: ConflictStrategy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_id,
            operation,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            local_payload,
            remote_payload,
            local_timestamp,
            remote_timestamp,
            strategy,
            resolved_payload: None,
            status: ConflictStatus::Pending,
        }
    }

    /// Returns true if the conflict still awaits a decision.
    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }

    /// Finalizes the conflict with the winning payload.
    pub fn resolve(&mut self, payload: Document) {
        self.resolved_payload = Some(payload);
        self.status = ConflictStatus::Resolved;
    }

    /// Dismisses the conflict.
    pub fn ignore(&mut self) {
        self.status = ConflictStatus::Ignored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_conflict() -> ConflictRecord {
        ConflictRecord::new(
            Uuid::new_v4(),
            OperationKind::Update,
            "profile",
            "user-1",
            json!({"xp": 50}),
            json!({"xp": 80}),
            100,
            200,
            ConflictStrategy::Merge,
        )
    }

    #[test]
    fn new_conflict_is_pending() {
        let conflict = make_conflict();
        assert!(conflict.is_pending());
        assert!(conflict.resolved_payload.is_none());
    }

    #[test]
    fn resolve_and_ignore() {
        let mut conflict = make_conflict();
        conflict.resolve(json!({"xp": 80}));
        assert_eq!(conflict.status, ConflictStatus::Resolved);
        assert_eq!(conflict.resolved_payload, Some(json!({"xp": 80})));

        let mut other = make_conflict();
        other.ignore();
        assert_eq!(other.status, ConflictStatus::Ignored);
        assert!(!other.is_pending());
    }

    #[test]
    fn strategy_names() {
        assert!(ConflictStrategy::Merge.auto_resolves());
        assert!(!ConflictStrategy::Manual.auto_resolves());

        let parsed: ConflictStrategy = serde_json::from_str("\"client_wins\"").unwrap();
        assert_eq!(parsed, ConflictStrategy::ClientWins);
        assert_eq!(ConflictStrategy::ServerWins.to_string(), "server_wins");
    }
}
