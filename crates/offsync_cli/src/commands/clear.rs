//! Clear command implementation.

use super::open_store;
use offsync_storage::PersistenceAdapter;
use std::path::Path;
use tracing::warn;

/// Runs the clear command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let records = store.load_queue()?;

    if dry_run {
        println!("Would remove {} record(s)", records.len());
        return Ok(());
    }

    store.save_queue(&[])?;
    warn!(count = records.len(), "sync queue cleared");
    println!("Removed {} record(s)", records.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{OperationKind, Payload, SyncRecord};
    use offsync_storage::FileStore;
    use tempfile::tempdir;

    fn seed(path: &Path) {
        let store = FileStore::open(path).unwrap();
        let record = SyncRecord::new(
            OperationKind::Delete,
            "note",
            "n1",
            Payload::plain("note", b"null".to_vec()),
            "device-a",
            "user-1",
            1,
        );
        store.save_queue(&[record]).unwrap();
    }

    #[test]
    fn dry_run_keeps_records() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        run(dir.path(), true).unwrap();
        assert_eq!(FileStore::open(dir.path()).unwrap().load_queue().unwrap().len(), 1);
    }

    #[test]
    fn clear_empties_queue() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        run(dir.path(), false).unwrap();
        assert!(FileStore::open(dir.path()).unwrap().load_queue().unwrap().is_empty());
    }
}
