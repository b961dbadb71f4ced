//! Persistence adapter trait definition.

use crate::error::StorageResult;
use offsync_protocol::{ConflictRecord, SyncRecord};

/// Durable store for the sync queue and conflict list.
///
/// # Invariants
///
/// - `save_*` overwrites the whole collection atomically: after a crash the
///   store holds either the previous or the new collection, never a mix
/// - `load_*` returns exactly what the last successful `save_*` stored, or an
///   empty collection if nothing was ever saved
/// - The engine is the only writer; concurrent readers must not rely on
///   mid-cycle consistency
pub trait PersistenceAdapter: Send + Sync {
    /// Replaces the stored queue.
    fn save_queue(&self, records: &[SyncRecord]) -> StorageResult<()>;

    /// Loads the stored queue.
    fn load_queue(&self) -> StorageResult<Vec<SyncRecord>>;

    /// Replaces the stored active conflict list.
    fn save_conflicts(&self, conflicts: &[ConflictRecord]) -> StorageResult<()>;

    /// Loads the stored active conflict list.
    fn load_conflicts(&self) -> StorageResult<Vec<ConflictRecord>>;

    /// Keeps finalized conflicts out of the active list.
    ///
    /// The default implementation discards them.
    fn archive_conflicts(&self, conflicts: &[ConflictRecord]) -> StorageResult<()> {
        let _ = conflicts;
        Ok(())
    }
}
