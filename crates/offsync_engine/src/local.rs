//! Hook for applying resolved conflicts to the application's local state.

use crate::error::SyncResult;
use offsync_protocol::Document;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Receives the winning document of every finalized conflict.
///
/// Called before the resolution is re-queued for upload. An error leaves
/// the conflict pending so it is retried on the next cycle.
pub trait LocalStore: Send + Sync {
    /// Stores `document` as the current local version of the entity.
    fn apply_resolution(&self, entity_type: &str, entity_id: &str, document: &Document)
        -> SyncResult<()>;
}

/// A local store that discards resolutions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLocalStore;

impl LocalStore for NoopLocalStore {
    fn apply_resolution(&self, _: &str, _: &str, _: &Document) -> SyncResult<()> {
        Ok(())
    }
}

/// A local store that keeps the latest document per entity in memory.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entities: RwLock<HashMap<(String, String), Document>>,
    applied: RwLock<u64>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current local version of an entity.
    pub fn get(&self, entity_type: &str, entity_id: &str) -> Option<Document> {
        self.entities
            .read()
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned()
    }

    /// Number of resolutions applied so far.
    pub fn applied_count(&self) -> u64 {
        *self.applied.read()
    }
}

impl LocalStore for MemoryLocalStore {
    fn apply_resolution(
        &self,
        entity_type: &str,
        entity_id: &str,
        document: &Document,
    ) -> SyncResult<()> {
        self.entities.write().insert(
            (entity_type.to_string(), entity_id.to_string()),
            document.clone(),
        );
        *self.applied.write() += 1;
        Ok(())
    }
}
