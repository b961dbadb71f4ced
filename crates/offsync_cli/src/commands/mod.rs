//! CLI command implementations.

use offsync_storage::FileStore;
use std::path::Path;

pub mod clear;
pub mod conflicts;
pub mod inspect;
pub mod retry;

/// Opens an existing queue directory.
///
/// Refuses to create one, so a mistyped path is reported instead of
/// silently producing an empty store.
pub fn open_store(path: &Path) -> Result<FileStore, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No queue directory found at {:?}", path).into());
    }
    Ok(FileStore::open(path)?)
}
