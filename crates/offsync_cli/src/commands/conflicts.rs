//! Conflicts command implementation.

use super::open_store;
use offsync_protocol::ConflictRecord;
use offsync_storage::PersistenceAdapter;
use serde::Serialize;
use std::path::Path;

/// One pending conflict as shown to the operator.
#[derive(Debug, Serialize)]
pub struct ConflictSummary {
    /// Conflict ID.
    pub id: String,
    /// Entity type.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Strategy in force when the conflict was detected.
    pub strategy: String,
    /// Local version timestamp.
    pub local_timestamp: u64,
    /// Remote version timestamp.
    pub remote_timestamp: u64,
    /// Local document.
    pub local: serde_json::Value,
    /// Remote document.
    pub remote: serde_json::Value,
}

impl From<&ConflictRecord> for ConflictSummary {
    fn from(conflict: &ConflictRecord) -> Self {
        Self {
            id: conflict.id.to_string(),
            entity_type: conflict.entity_type.clone(),
            entity_id: conflict.entity_id.clone(),
            strategy: conflict.strategy.to_string(),
            local_timestamp: conflict.local_timestamp,
            remote_timestamp: conflict.remote_timestamp,
            local: conflict.local_payload.clone(),
            remote: conflict.remote_payload.clone(),
        }
    }
}

/// Runs the conflicts command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let pending: Vec<ConflictSummary> = store
        .load_conflicts()?
        .iter()
        .filter(|c| c.is_pending())
        .map(ConflictSummary::from)
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&pending)?);
        }
        _ => {
            if pending.is_empty() {
                println!("No pending conflicts");
            }
            for conflict in &pending {
                println!(
                    "{} {}/{} [{}] local@{} remote@{}",
                    conflict.id,
                    conflict.entity_type,
                    conflict.entity_id,
                    conflict.strategy,
                    conflict.local_timestamp,
                    conflict.remote_timestamp
                );
                println!("  local:  {}", conflict.local);
                println!("  remote: {}", conflict.remote);
            }
        }
    }

    Ok(())
}
