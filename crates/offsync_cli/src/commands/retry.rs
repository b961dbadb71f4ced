//! Retry command implementation.

use super::open_store;
use offsync_engine::{OperationQueue, SyncConfig};
use offsync_storage::{FileStore, PersistenceAdapter};
use std::path::Path;
use tracing::info;

/// Resets terminal-failed records in `store`. Returns the number reset.
pub fn retry(store: &FileStore, config: &SyncConfig) -> Result<usize, Box<dyn std::error::Error>> {
    let mut queue = OperationQueue::from_records(store.load_queue()?);
    let count = queue.retry_terminal(config.max_retries);
    if count > 0 {
        store.save_queue(queue.records())?;
    }
    Ok(count)
}

/// Runs the retry command.
pub fn run(path: &Path, config: &SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let count = retry(&store, config)?;
    info!(count, "reset terminal-failed records");
    println!("Reset {} record(s) for retry", count);
    Ok(())
}
