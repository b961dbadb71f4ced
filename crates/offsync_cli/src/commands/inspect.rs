//! Inspect command implementation.

use super::open_store;
use offsync_engine::{OperationQueue, QueueCounts, SyncConfig};
use offsync_storage::{FileStore, PersistenceAdapter};
use serde::Serialize;
use std::path::Path;

/// Queue directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Queue directory path.
    pub path: String,
    /// Records per status.
    pub counts: QueueCounts,
    /// Total queued records.
    pub total: usize,
    /// Failed records that will not be retried automatically.
    pub terminal_failed: usize,
    /// Records rejected by the server.
    pub rejected: usize,
    /// Conflicts awaiting resolution.
    pub pending_conflicts: usize,
    /// Settled conflicts in the archive.
    pub archived_conflicts: usize,
    /// Creation time of the oldest record (ms since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_record: Option<u64>,
    /// Whether the queue exceeds the configured warning threshold.
    pub capacity_warning: bool,
}

/// Gathers statistics from an open store.
pub fn inspect(
    store: &FileStore,
    config: &SyncConfig,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let queue = OperationQueue::from_records(store.load_queue()?);
    let conflicts = store.load_conflicts()?;
    let archived = store.load_archive()?;

    let counts = queue.counts();
    Ok(InspectResult {
        path: store.path().display().to_string(),
        counts,
        total: counts.total(),
        terminal_failed: queue
            .records()
            .iter()
            .filter(|r| r.is_terminal_failed(config.max_retries))
            .count(),
        rejected: queue.records().iter().filter(|r| r.rejected).count(),
        pending_conflicts: conflicts.iter().filter(|c| c.is_pending()).count(),
        archived_conflicts: archived.len(),
        oldest_record: queue.records().first().map(|r| r.created_at),
        capacity_warning: queue.is_over_capacity(config.queue_capacity_warning_threshold),
    })
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    config: &SyncConfig,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let result = inspect(&store, config)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("offsync Queue Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Records:");
    println!("  Pending:   {}", result.counts.pending);
    println!("  Syncing:   {}", result.counts.syncing);
    println!("  Completed: {}", result.counts.completed);
    println!("  Failed:    {}", result.counts.failed);
    println!("  Conflict:  {}", result.counts.conflict);
    println!("  Total:     {}", result.total);
    println!();
    println!("Failures:");
    println!("  Terminal:  {}", result.terminal_failed);
    println!("  Rejected:  {}", result.rejected);
    println!();
    println!("Conflicts:");
    println!("  Pending:   {}", result.pending_conflicts);
    println!("  Archived:  {}", result.archived_conflicts);

    if let Some(oldest) = result.oldest_record {
        println!();
        println!("Oldest record: {} ms", oldest);
    }
    if result.capacity_warning {
        println!();
        println!("WARNING: queue exceeds the capacity warning threshold");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{OperationKind, Payload, RecordStatus, SyncRecord};
    use tempfile::tempdir;

    fn record(entity_id: &str, created_at: u64) -> SyncRecord {
        SyncRecord::new(
            OperationKind::Create,
            "note",
            entity_id,
            Payload::plain("note", b"{}".to_vec()),
            "device-a",
            "user-1",
            created_at,
        )
    }

    #[test]
    fn counts_records_by_status() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut failed = record("b", 2);
        failed.set_status(RecordStatus::Syncing).unwrap();
        failed.set_status(RecordStatus::Failed).unwrap();
        failed.retry_count = 3;
        store.save_queue(&[record("a", 1), failed]).unwrap();

        let config = SyncConfig::default().with_capacity_warning_threshold(1);
        let result = inspect(&store, &config).unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.counts.pending, 1);
        assert_eq!(result.counts.failed, 1);
        assert_eq!(result.terminal_failed, 1);
        assert_eq!(result.oldest_record, Some(1));
        assert!(result.capacity_warning);
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(run(&missing, &SyncConfig::default(), "text").is_err());
        assert!(!missing.exists());
    }
}
