//! File-based persistence adapter.

use crate::adapter::PersistenceAdapter;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use offsync_protocol::{ConflictRecord, SyncRecord};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const QUEUE_FILE: &str = "queue.cbor";
const CONFLICTS_FILE: &str = "conflicts.cbor";
const ARCHIVE_FILE: &str = "conflict_archive.jsonl";
const LOCK_FILE: &str = "offsync.lock";

/// On-disk format version of collection files.
const FORMAT_VERSION: u16 = 1;

#[derive(Serialize)]
struct StoredCollectionRef<'a, T> {
    version: u16,
    items: &'a [T],
}

#[derive(Deserialize)]
struct StoredCollection<T> {
    version: u16,
    items: Vec<T>,
}

/// A directory-backed persistence adapter.
///
/// Each collection lives in its own CBOR file. Writes go to a temporary
/// sibling that is fsynced and then renamed over the target, so a crash
/// leaves either the old or the new collection on disk.
///
/// # Single Writer
///
/// Opening a store takes an exclusive advisory lock on `offsync.lock` inside
/// the directory. A second [`FileStore::open`] on the same directory fails
/// with [`StorageError::Locked`] until the first store is dropped.
///
/// # Example
///
/// ```no_run
/// use offsync_storage::{FileStore, PersistenceAdapter};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("sync-data")).unwrap();
/// let pending = store.load_queue().unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    lock: File,
    archive: Mutex<()>,
}

impl FileStore {
    /// Opens or creates a store in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or another
    /// writer holds the lock.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| StorageError::Locked(dir.to_path_buf()))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            lock,
            archive: Mutex::new(()),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Reads every archived conflict, oldest first.
    pub fn load_archive(&self) -> StorageResult<Vec<ConflictRecord>> {
        let path = self.dir.join(ARCHIVE_FILE);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        data.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| StorageError::Corrupted(format!("{ARCHIVE_FILE}: {e}")))
            })
            .collect()
    }

    fn write_collection<T: Serialize>(&self, name: &str, items: &[T]) -> StorageResult<()> {
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));

        let stored = StoredCollectionRef {
            version: FORMAT_VERSION,
            items,
        };

        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            ciborium::into_writer(&stored, &mut writer)
                .map_err(|e| StorageError::Encode(e.to_string()))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp, &target)?;
        sync_dir(&self.dir);
        Ok(())
    }

    fn read_collection<T: DeserializeOwned>(&self, name: &str) -> StorageResult<Vec<T>> {
        let path = self.dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredCollection<T> = ciborium::from_reader(bytes.as_slice())
            .map_err(|e| StorageError::Corrupted(format!("{name}: {e}")))?;

        if stored.version != FORMAT_VERSION {
            return Err(StorageError::Corrupted(format!(
                "{name}: unsupported format version {}",
                stored.version
            )));
        }

        Ok(stored.items)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock);
    }
}

/// Makes a completed rename durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        if let Err(e) = handle.sync_all() {
            tracing::debug!(error = %e, "directory fsync failed");
        }
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

impl PersistenceAdapter for FileStore {
    fn save_queue(&self, records: &[SyncRecord]) -> StorageResult<()> {
        self.write_collection(QUEUE_FILE, records)
    }

    fn load_queue(&self) -> StorageResult<Vec<SyncRecord>> {
        self.read_collection(QUEUE_FILE)
    }

    fn save_conflicts(&self, conflicts: &[ConflictRecord]) -> StorageResult<()> {
        self.write_collection(CONFLICTS_FILE, conflicts)
    }

    fn load_conflicts(&self) -> StorageResult<Vec<ConflictRecord>> {
        self.read_collection(CONFLICTS_FILE)
    }

    fn archive_conflicts(&self, conflicts: &[ConflictRecord]) -> StorageResult<()> {
        if conflicts.is_empty() {
            return Ok(());
        }

        let _guard = self.archive.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(ARCHIVE_FILE))?;

        for conflict in conflicts {
            let line = serde_json::to_string(conflict)
                .map_err(|e| StorageError::Encode(e.to_string()))?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        Ok(())
    }
}
