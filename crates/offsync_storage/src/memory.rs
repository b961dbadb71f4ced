//! In-memory persistence adapter for testing.

use crate::adapter::PersistenceAdapter;
use crate::error::{StorageError, StorageResult};
use offsync_protocol::{ConflictRecord, SyncRecord};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// An in-memory persistence adapter.
///
/// Suitable for unit tests, integration tests and engines that do not need
/// to survive a restart. Sharing one store between two engine instances
/// (via `Arc`) simulates a process restart.
///
/// Writes can be made to fail on demand with [`fail_next_writes`](Self::fail_next_writes)
/// to exercise persistence error handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    queue: RwLock<Vec<SyncRecord>>,
    conflicts: RwLock<Vec<ConflictRecord>>,
    archive: RwLock<Vec<ConflictRecord>>,
    failing_writes: AtomicU32,
    queue_saves: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` `save_*` calls fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of successful `save_queue` calls so far.
    pub fn queue_saves(&self) -> u64 {
        self.queue_saves.load(Ordering::SeqCst)
    }

    /// Returns every archived conflict.
    pub fn archived(&self) -> Vec<ConflictRecord> {
        self.archive.read().clone()
    }

    fn check_write(&self) -> StorageResult<()> {
        let remaining = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(StorageError::Rejected("injected write failure".into())),
            Err(_) => Ok(()),
        }
    }
}

impl PersistenceAdapter for MemoryStore {
    fn save_queue(&self, records: &[SyncRecord]) -> StorageResult<()> {
        self.check_write()?;
        *self.queue.write() = records.to_vec();
        self.queue_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_queue(&self) -> StorageResult<Vec<SyncRecord>> {
        Ok(self.queue.read().clone())
    }

    fn save_conflicts(&self, conflicts: &[ConflictRecord]) -> StorageResult<()> {
        self.check_write()?;
        *self.conflicts.write() = conflicts.to_vec();
        Ok(())
    }

    fn load_conflicts(&self) -> StorageResult<Vec<ConflictRecord>> {
        Ok(self.conflicts.read().clone())
    }

    fn archive_conflicts(&self, conflicts: &[ConflictRecord]) -> StorageResult<()> {
        self.archive.write().extend_from_slice(conflicts);
        Ok(())
    }
}
