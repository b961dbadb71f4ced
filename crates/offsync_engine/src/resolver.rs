//! Conflict resolution.
//!
//! Resolution is a pure function of the conflict: the same conflict always
//! yields the same document, and documents encode canonically, so resolving
//! twice produces byte-identical payloads.

use offsync_protocol::{ConflictRecord, ConflictStrategy, Document};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Timestamps of the two sides of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeContext {
    /// When the local version was produced.
    pub local_timestamp: u64,
    /// When the remote version was reported.
    pub remote_timestamp: u64,
}

impl MergeContext {
    /// Last-writer-wins: true if the local side is strictly newer.
    pub fn local_is_newer(&self) -> bool {
        self.local_timestamp > self.remote_timestamp
    }
}

/// Merges two versions of one entity type.
pub trait EntityMerger: Send + Sync {
    /// Produces the merged document.
    fn merge(&self, local: &Document, remote: &Document, ctx: &MergeContext) -> Document;
}

impl<F> EntityMerger for F
where
    F: Fn(&Document, &Document, &MergeContext) -> Document + Send + Sync,
{
    fn merge(&self, local: &Document, remote: &Document, ctx: &MergeContext) -> Document {
        self(local, remote, ctx)
    }
}

/// The default field-wise merge. See [`merge_documents`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMerger;

impl EntityMerger for FieldMerger {
    fn merge(&self, local: &Document, remote: &Document, ctx: &MergeContext) -> Document {
        merge_documents(local, remote, ctx)
    }
}

/// Resolves conflicts according to their strategy.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    mergers: HashMap<String, Arc<dyn EntityMerger>>,
}

impl ConflictResolver {
    /// Creates a resolver using [`FieldMerger`] for every entity type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a merge function for one entity type.
    pub fn with_merger(
        mut self,
        entity_type: impl Into<String>,
        merger: impl EntityMerger + 'static,
    ) -> Self {
        self.mergers.insert(entity_type.into(), Arc::new(merger));
        self
    }

    /// Returns the winning document, or `None` for manual conflicts.
    pub fn resolve(&self, conflict: &ConflictRecord) -> Option<Document> {
        match conflict.strategy {
            ConflictStrategy::ServerWins => Some(conflict.remote_payload.clone()),
            ConflictStrategy::ClientWins => Some(conflict.local_payload.clone()),
            ConflictStrategy::Merge => {
                let ctx = MergeContext {
                    local_timestamp: conflict.local_timestamp,
                    remote_timestamp: conflict.remote_timestamp,
                };
                let merged = match self.mergers.get(&conflict.entity_type) {
                    Some(merger) => {
                        merger.merge(&conflict.local_payload, &conflict.remote_payload, &ctx)
                    }
                    None => merge_documents(&conflict.local_payload, &conflict.remote_payload, &ctx),
                };
                Some(merged)
            }
            ConflictStrategy::Manual => None,
        }
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.mergers.keys().collect();
        types.sort();
        f.debug_struct("ConflictResolver")
            .field("mergers", &types)
            .finish()
    }
}

/// Field-wise merge of two documents.
///
/// - A value present (and non-null) on only one side is kept.
/// - Numbers take the maximum.
/// - Arrays take the union: local elements in order, then remote elements
///   not already present.
/// - Objects merge recursively, key by key.
/// - Any other disagreement goes to the newer side; ties go to remote.
pub fn merge_documents(local: &Document, remote: &Document, ctx: &MergeContext) -> Document {
    match (local, remote) {
        (Value::Null, other) | (other, Value::Null) => other.clone(),
        (Value::Object(l), Value::Object(r)) => Value::Object(merge_objects(l, r, ctx)),
        (Value::Array(l), Value::Array(r)) => Value::Array(union(l, r)),
        (Value::Number(l), Value::Number(r)) => Value::Number(max_number(l, r).clone()),
        (l, r) if l == r => l.clone(),
        (l, r) => {
            if ctx.local_is_newer() {
                l.clone()
            } else {
                r.clone()
            }
        }
    }
}

fn merge_objects(
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
    ctx: &MergeContext,
) -> Map<String, Value> {
    let mut merged = Map::new();
    for (key, l) in local {
        let value = match remote.get(key) {
            Some(r) => merge_documents(l, r, ctx),
            None => l.clone(),
        };
        merged.insert(key.clone(), value);
    }
    for (key, r) in remote {
        if !local.contains_key(key) {
            merged.insert(key.clone(), r.clone());
        }
    }
    merged
}

fn union(local: &[Value], remote: &[Value]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
    for value in local.iter().chain(remote) {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}

fn max_number<'a>(local: &'a Number, remote: &'a Number) -> &'a Number {
    let ordering = match (local.as_i64(), remote.as_i64()) {
        (Some(l), Some(r)) => l.cmp(&r),
        _ => match (local.as_u64(), remote.as_u64()) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => {
                let l = local.as_f64().unwrap_or(f64::NAN);
                let r = remote.as_f64().unwrap_or(f64::NAN);
                l.partial_cmp(&r).unwrap_or(Ordering::Equal)
            }
        },
    };
    if ordering == Ordering::Less {
        remote
    } else {
        local
    }
}
