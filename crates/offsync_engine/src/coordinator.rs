//! The sync coordinator: owner of the queue, the conflict list and the
//! sync cycle.

use crate::config::{SyncConfig, SyncConfigUpdate};
use crate::envelope::Envelope;
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalStore, NoopLocalStore};
use crate::network::{NetworkMonitor, NetworkObserver};
use crate::queue::{OperationQueue, QueueCounts};
use crate::resolver::{ConflictResolver, EntityMerger};
use crate::transport::RemoteEndpoint;
use crate::uploader::{apply_outcomes, BatchReport, BatchUploader};
use offsync_protocol::{
    now_millis, CodecRegistry, ConflictRecord, Document, OperationKind, SyncRecord, Uuid,
};
use offsync_storage::{Cipher, MemoryStore, PassthroughCipher, PersistenceAdapter, StorageResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Whether a sync cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No cycle is running.
    Idle,
    /// A cycle is uploading batches.
    Syncing,
}

/// Counts of one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Records sent to the endpoint (or failed locally before sending).
    pub attempted: usize,
    /// Records acknowledged by the remote store.
    pub success: usize,
    /// Records that failed.
    pub failed: usize,
    /// Conflicts raised.
    pub conflicts: usize,
}

impl SyncSummary {
    /// Returns true if the cycle touched no record.
    pub fn is_empty(&self) -> bool {
        self.attempted == 0
    }

    fn absorb(&mut self, report: &BatchReport) {
        self.success += report.success;
        self.failed += report.failed;
        self.conflicts += report.conflicts.len();
    }
}

/// Snapshot of the engine for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    /// Current reachability.
    pub is_online: bool,
    /// Whether a cycle is running.
    pub is_syncing: bool,
    /// Records in the queue, in any status.
    pub queue_length: usize,
    /// Records per status.
    pub counts: QueueCounts,
    /// Conflicts awaiting a decision.
    pub conflict_count: usize,
    /// End of the last cycle (ms since epoch).
    pub last_sync: Option<u64>,
    /// Most recent error messages, oldest first.
    pub errors: Vec<String>,
    /// Set while the queue is above the capacity warning threshold.
    pub capacity_warning: bool,
}

impl SyncStatus {
    /// State derived from `is_syncing`.
    pub fn state(&self) -> SyncState {
        if self.is_syncing {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    queue: OperationQueue,
    conflicts: Vec<ConflictRecord>,
}

#[derive(Debug, Default)]
struct StatusLog {
    last_sync: Option<u64>,
    errors: VecDeque<String>,
    capacity_warning: bool,
}

/// Clears the syncing flag when a cycle ends, including on cancellation.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Offline-first sync coordinator.
///
/// Owns the operation queue and the conflict list, persists both through a
/// [`PersistenceAdapter`] and uploads pending records to a
/// [`RemoteEndpoint`]. Share it behind an `Arc`; every method takes `&self`.
///
/// # Cycle
///
/// 1. Select `pending` and retryable `failed` records whose backoff elapsed.
/// 2. Upload them in FIFO batches of `batch_size`, one batch at a time.
/// 3. Resolve pending conflicts with automatic strategies.
/// 4. Prune completed records, archive finalized conflicts and persist.
///
/// At most one cycle runs at a time; a trigger while syncing is a no-op.
///
/// # Example
///
/// ```rust
/// use offsync_engine::{MockEndpoint, SyncConfig, SyncCoordinator};
/// use offsync_protocol::OperationKind;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let engine = SyncCoordinator::builder(SyncConfig::new("device-a"), Arc::new(MockEndpoint::new()))
///     .build()
///     .unwrap();
///
/// engine
///     .queue_operation(OperationKind::Create, "note", "n1", &json!({"title": "hi"}), "user-1")
///     .unwrap();
/// let summary = engine.perform_sync().await;
/// assert_eq!(summary.success, 1);
/// # });
/// ```
pub struct SyncCoordinator<E: RemoteEndpoint> {
    config: RwLock<SyncConfig>,
    state: Mutex<EngineState>,
    status: Mutex<StatusLog>,
    uploader: BatchUploader<E>,
    envelope: Envelope,
    resolver: ConflictResolver,
    persistence: Arc<dyn PersistenceAdapter>,
    network: Arc<dyn NetworkObserver>,
    local: Arc<dyn LocalStore>,
    syncing: AtomicBool,
}

impl<E: RemoteEndpoint> SyncCoordinator<E> {
    /// Starts building a coordinator.
    pub fn builder(config: SyncConfig, endpoint: Arc<E>) -> SyncCoordinatorBuilder<E> {
        SyncCoordinatorBuilder::new(config, endpoint)
    }

    /// Returns a copy of the current configuration.
    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    /// Returns the remote endpoint.
    pub fn endpoint(&self) -> &Arc<E> {
        self.uploader.endpoint()
    }

    pub(crate) fn network(&self) -> &Arc<dyn NetworkObserver> {
        &self.network
    }

    /// Durably enqueues one mutation and returns its record ID.
    ///
    /// The new queue is written to the adapter before the record becomes
    /// visible; if every write attempt fails the record is not enqueued.
    /// Never blocks on queue size.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] for an empty entity type or ID, or a
    ///   document the entity's codec cannot encode
    /// - [`SyncError::Encryption`] if sealing the payload fails
    /// - [`SyncError::Persistence`] if the queue cannot be written
    pub fn queue_operation(
        &self,
        operation: OperationKind,
        entity_type: &str,
        entity_id: &str,
        data: &Document,
        user_id: &str,
    ) -> SyncResult<Uuid> {
        if entity_type.is_empty() || entity_id.is_empty() {
            return Err(SyncError::Validation(
                "entity type and entity id must not be empty".into(),
            ));
        }

        let config = self.config();
        let payload = self
            .envelope
            .seal(entity_type, data, config.encryption_enabled)?;

        let (id, queue_length) = {
            let mut state = self.state.lock();
            let record = SyncRecord::new(
                operation,
                entity_type,
                entity_id,
                payload,
                config.device_id.as_str(),
                user_id,
                now_millis(),
            );
            let id = record.id;

            let mut next: Vec<SyncRecord> = Vec::with_capacity(state.queue.len() + 1);
            next.extend_from_slice(state.queue.records());
            next.push(record.clone());
            write_with_retry(config.persist_attempts, "queue", || {
                self.persistence.save_queue(&next)
            })
            .inspect_err(|e| self.record_errors(vec![e.to_string()]))?;

            state.queue.push(record);
            (id, state.queue.len())
        };

        debug!(
            record_id = %id,
            %operation,
            entity_type,
            entity_id,
            queue_length,
            "operation queued"
        );
        self.refresh_capacity(queue_length, config.queue_capacity_warning_threshold);
        Ok(id)
    }

    /// Runs one sync cycle if online and idle.
    ///
    /// Never fails: record and batch failures are reflected in the summary,
    /// in the records themselves and in [`get_sync_status`](Self::get_sync_status).
    /// Returns an empty summary when offline or when a cycle is already
    /// running.
    pub async fn perform_sync(&self) -> SyncSummary {
        if !self.network.is_online() {
            debug!("offline, skipping sync cycle");
            return SyncSummary::default();
        }
        let Some(_guard) = CycleGuard::acquire(&self.syncing) else {
            debug!("sync cycle already running");
            return SyncSummary::default();
        };
        self.run_cycle().await
    }

    /// Like [`perform_sync`](Self::perform_sync) but fails fast when offline.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Offline`] if the network observer reports no
    /// connectivity.
    pub async fn force_sync(&self) -> SyncResult<SyncSummary> {
        if !self.network.is_online() {
            return Err(SyncError::Offline);
        }
        Ok(self.perform_sync().await)
    }

    async fn run_cycle(&self) -> SyncSummary {
        let config = self.config();
        let started = Instant::now();

        let candidates: HashSet<Uuid> = {
            let mut state = self.state.lock();
            let recovered = state.queue.recover_interrupted();
            if recovered > 0 {
                warn!(recovered, "recovered records from an interrupted cycle");
            }
            state.queue.records().iter().map(|r| r.id).collect()
        };

        let mut summary = SyncSummary::default();
        let mut attempted: HashSet<Uuid> = HashSet::new();
        let mut held: HashSet<(String, String)> = HashSet::new();
        let mut errors: Vec<String> = Vec::new();
        let batch_size = config.batch_size.max(1);

        // Batches are picked one at a time so a record only goes out once
        // the previous record for its entity has settled.
        loop {
            let batch = {
                let mut state = self.state.lock();
                let now = now_millis();
                let ready = state.queue.ready_ids(now, config.max_retries);
                let mut batch = Vec::with_capacity(batch_size);
                for id in ready {
                    if batch.len() == batch_size {
                        break;
                    }
                    if !candidates.contains(&id) || attempted.contains(&id) {
                        continue;
                    }
                    let blocked = state
                        .queue
                        .get(&id)
                        .map_or(true, |r| held.contains(&entity_key(r)));
                    if blocked {
                        continue;
                    }
                    if let Some(record) = state.queue.mark_syncing(&id, now, config.max_retries) {
                        attempted.insert(id);
                        batch.push(record);
                    }
                }
                batch
            };
            if batch.is_empty() {
                break;
            }

            debug!(size = batch.len(), "uploading batch");
            summary.attempted += batch.len();
            let outcomes = self
                .uploader
                .submit(&batch, &config.device_id, config.batch_timeout())
                .await;

            let mut state = self.state.lock();
            let report = apply_outcomes(&mut state.queue, &batch, outcomes, &config, now_millis());
            summary.absorb(&report);
            debug!(
                success = report.success,
                failed = report.failed,
                conflicts = report.conflicts.len(),
                "batch applied"
            );
            held.extend(report.held_entities);
            errors.extend(report.errors);
            state.conflicts.extend(report.conflicts);
        }

        let queue_length = {
            let mut state = self.state.lock();
            errors.extend(self.resolve_pending(&mut state, &config));
            errors.extend(self.settle_conflicts(&mut state, &config));
            if let Err(e) = self.persist_state(&state, &config) {
                errors.push(e.to_string());
            }
            state.queue.len()
        };

        self.status.lock().last_sync = Some(now_millis());
        self.record_errors(errors);
        self.refresh_capacity(queue_length, config.queue_capacity_warning_threshold);

        info!(
            attempted = summary.attempted,
            success = summary.success,
            failed = summary.failed,
            conflicts = summary.conflicts,
            queue_length,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync cycle finished"
        );
        summary
    }

    /// Resolves pending conflicts whose strategy is automatic.
    fn resolve_pending(&self, state: &mut EngineState, config: &SyncConfig) -> Vec<String> {
        let mut errors = Vec::new();
        let EngineState { queue, conflicts } = state;

        for conflict in conflicts
            .iter_mut()
            .filter(|c| c.is_pending() && c.strategy.auto_resolves())
        {
            let Some(document) = self.resolver.resolve(conflict) else {
                continue;
            };
            match self.requeue_resolution(queue, conflict, document, config) {
                Ok(record_id) => debug!(
                    conflict_id = %conflict.id,
                    %record_id,
                    strategy = %conflict.strategy,
                    "conflict resolved"
                ),
                Err(e) => {
                    warn!(conflict_id = %conflict.id, error = %e, "conflict resolution failed");
                    errors.push(format!(
                        "resolving {}/{}: {e}",
                        conflict.entity_type, conflict.entity_id
                    ));
                }
            }
        }
        errors
    }

    /// Applies `document` locally, queues it as an update in the conflicted
    /// record's slot and finalizes the conflict. Leaves the conflict pending
    /// on error.
    fn requeue_resolution(
        &self,
        queue: &mut OperationQueue,
        conflict: &mut ConflictRecord,
        document: Document,
        config: &SyncConfig,
    ) -> SyncResult<Uuid> {
        let payload =
            self.envelope
                .seal(&conflict.entity_type, &document, config.encryption_enabled)?;
        self.local
            .apply_resolution(&conflict.entity_type, &conflict.entity_id, &document)?;

        let (origin_user, created_at) = queue
            .get(&conflict.record_id)
            .map(|r| (r.origin_user.clone(), r.created_at))
            .unwrap_or_else(|| (String::new(), now_millis()));
        let record = SyncRecord::new(
            OperationKind::Update,
            conflict.entity_type.clone(),
            conflict.entity_id.clone(),
            payload,
            config.device_id.as_str(),
            origin_user,
            created_at,
        );
        let id = record.id;
        queue.replace(&conflict.record_id, record);
        conflict.resolve(document);
        Ok(id)
    }

    /// Archives finalized conflicts, drops them from the active list and
    /// prunes completed records along with the records they settled.
    fn settle_conflicts(&self, state: &mut EngineState, config: &SyncConfig) -> Option<String> {
        let finalized: Vec<ConflictRecord> = state
            .conflicts
            .iter()
            .filter(|c| !c.is_pending())
            .cloned()
            .collect();

        let mut settled = HashSet::new();
        let mut failure = None;
        if !finalized.is_empty() {
            match write_with_retry(config.persist_attempts, "conflict archive", || {
                self.persistence.archive_conflicts(&finalized)
            }) {
                Ok(()) => {
                    state.conflicts.retain(ConflictRecord::is_pending);
                    settled.extend(finalized.iter().map(|c| c.record_id));
                }
                Err(e) => failure = Some(e.to_string()),
            }
        }

        let pruned = state.queue.prune_completed(&settled);
        if pruned > 0 {
            debug!(pruned, archived = settled.len(), "queue pruned");
        }
        failure
    }

    fn persist_state(&self, state: &EngineState, config: &SyncConfig) -> SyncResult<()> {
        write_with_retry(config.persist_attempts, "queue", || {
            self.persistence.save_queue(state.queue.records())
        })?;
        write_with_retry(config.persist_attempts, "conflicts", || {
            self.persistence.save_conflicts(&state.conflicts)
        })
    }

    /// Returns a status snapshot.
    pub fn get_sync_status(&self) -> SyncStatus {
        let (queue_length, counts, conflict_count) = {
            let state = self.state.lock();
            (
                state.queue.len(),
                state.queue.counts(),
                state.conflicts.iter().filter(|c| c.is_pending()).count(),
            )
        };
        let status = self.status.lock();
        SyncStatus {
            is_online: self.network.is_online(),
            is_syncing: self.syncing.load(Ordering::Acquire),
            queue_length,
            counts,
            conflict_count,
            last_sync: status.last_sync,
            errors: status.errors.iter().cloned().collect(),
            capacity_warning: status.capacity_warning,
        }
    }

    /// Removes every record from the queue. Returns the number removed.
    ///
    /// Diagnostic use only: the removed mutations are never uploaded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if the empty queue cannot be written.
    pub fn clear_sync_queue(&self) -> SyncResult<usize> {
        let config = self.config();
        let removed = {
            let mut state = self.state.lock();
            let removed = state.queue.clear();
            write_with_retry(config.persist_attempts, "queue", || {
                self.persistence.save_queue(state.queue.records())
            })?;
            removed
        };
        warn!(removed, "sync queue cleared");
        self.refresh_capacity(0, config.queue_capacity_warning_threshold);
        Ok(removed)
    }

    /// Applies a partial configuration update and returns the new
    /// configuration. Takes effect from the next cycle.
    ///
    /// # Errors
    ///
    /// [`SyncError::Validation`] for invalid values, [`SyncError::Encryption`]
    /// when enabling encryption without a cipher.
    pub fn update_config(&self, update: SyncConfigUpdate) -> SyncResult<SyncConfig> {
        let mut config = self.config.write();
        let next = config.merged(&update);
        next.validate()?;
        if next.encryption_enabled && !self.envelope.can_encrypt() {
            return Err(SyncError::Encryption(
                "encryption enabled but no cipher is configured".into(),
            ));
        }
        *config = next.clone();
        info!(?update, "sync configuration updated");
        Ok(next)
    }

    /// Conflicts awaiting a decision, oldest first.
    pub fn pending_conflicts(&self) -> Vec<ConflictRecord> {
        self.state
            .lock()
            .conflicts
            .iter()
            .filter(|c| c.is_pending())
            .cloned()
            .collect()
    }

    /// Finalizes a pending conflict with a caller-chosen document.
    ///
    /// The document is applied locally, queued as an update, and the conflict
    /// is archived. Returns the ID of the queued record.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ConflictNotFound`] if no pending conflict has `conflict_id`
    /// - [`SyncError::Validation`] or [`SyncError::Encryption`] if the document
    ///   cannot be sealed
    /// - [`SyncError::Persistence`] if the new state cannot be written; the
    ///   resolution stays applied in memory and is written by the next
    ///   successful persist
    pub fn apply_manual_resolution(&self, conflict_id: Uuid, chosen: Document) -> SyncResult<Uuid> {
        let config = self.config();
        let mut state = self.state.lock();

        let record_id = {
            let EngineState { queue, conflicts } = &mut *state;
            let conflict = conflicts
                .iter_mut()
                .find(|c| c.id == conflict_id && c.is_pending())
                .ok_or(SyncError::ConflictNotFound(conflict_id))?;
            self.requeue_resolution(queue, conflict, chosen, &config)?
        };
        info!(%conflict_id, %record_id, "conflict resolved manually");

        self.finish_change(&mut state, &config)?;
        Ok(record_id)
    }

    /// Dismisses a pending conflict without queuing anything.
    ///
    /// # Errors
    ///
    /// [`SyncError::ConflictNotFound`] if no pending conflict has
    /// `conflict_id`, [`SyncError::Persistence`] if the new state cannot be
    /// written.
    pub fn ignore_conflict(&self, conflict_id: Uuid) -> SyncResult<()> {
        let config = self.config();
        let mut state = self.state.lock();

        state
            .conflicts
            .iter_mut()
            .find(|c| c.id == conflict_id && c.is_pending())
            .ok_or(SyncError::ConflictNotFound(conflict_id))?
            .ignore();
        info!(%conflict_id, "conflict ignored");

        self.finish_change(&mut state, &config)
    }

    /// Gives terminal-failed records a fresh retry budget. Returns how many
    /// were reset.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if the queue cannot be written.
    pub fn retry_failed(&self) -> SyncResult<usize> {
        let config = self.config();
        let mut state = self.state.lock();
        let reset = state.queue.retry_terminal(config.max_retries);
        if reset > 0 {
            write_with_retry(config.persist_attempts, "queue", || {
                self.persistence.save_queue(state.queue.records())
            })?;
            info!(reset, "terminal failures reset for retry");
        }
        Ok(reset)
    }

    /// Writes the queue and the conflict list to the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if a write fails.
    pub fn flush(&self) -> SyncResult<()> {
        let config = self.config();
        let state = self.state.lock();
        self.persist_state(&state, &config)
    }

    /// Snapshot of every queued record, FIFO.
    pub fn records(&self) -> Vec<SyncRecord> {
        self.state.lock().queue.records().to_vec()
    }

    /// Number of queued records.
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn finish_change(&self, state: &mut EngineState, config: &SyncConfig) -> SyncResult<()> {
        if let Some(e) = self.settle_conflicts(state, config) {
            self.record_errors(vec![e]);
        }
        self.persist_state(state, config)
            .inspect_err(|e| self.record_errors(vec![e.to_string()]))
    }

    fn record_errors(&self, errors: Vec<String>) {
        if errors.is_empty() {
            return;
        }
        let limit = self.config.read().max_status_errors;
        let mut status = self.status.lock();
        for message in errors {
            status.errors.push_back(message);
        }
        while status.errors.len() > limit {
            status.errors.pop_front();
        }
    }

    fn refresh_capacity(&self, queue_length: usize, threshold: usize) {
        let over = queue_length > threshold;
        let mut status = self.status.lock();
        if over && !status.capacity_warning {
            warn!(
                queue_length,
                threshold, "operation queue above capacity warning threshold"
            );
        }
        status.capacity_warning = over;
    }
}

impl<E: RemoteEndpoint> std::fmt::Debug for SyncCoordinator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("config", &*self.config.read())
            .field("syncing", &self.syncing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn entity_key(record: &SyncRecord) -> (String, String) {
    (record.entity_type.clone(), record.entity_id.clone())
}

/// Runs `write` up to `attempts` times.
fn write_with_retry(
    attempts: u32,
    what: &'static str,
    mut write: impl FnMut() -> StorageResult<()>,
) -> SyncResult<()> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match write() {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(what, attempt, error = %e, "persist failed, retrying");
                attempt += 1;
            }
            Err(e) => {
                error!(what, attempts, error = %e, "persist failed");
                return Err(SyncError::Persistence {
                    attempts,
                    source: e,
                });
            }
        }
    }
}

/// Builder for [`SyncCoordinator`].
pub struct SyncCoordinatorBuilder<E: RemoteEndpoint> {
    config: SyncConfig,
    endpoint: Arc<E>,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    network: Option<Arc<dyn NetworkObserver>>,
    cipher: Option<Arc<dyn Cipher>>,
    local: Option<Arc<dyn LocalStore>>,
    codecs: CodecRegistry,
    resolver: ConflictResolver,
}

impl<E: RemoteEndpoint> SyncCoordinatorBuilder<E> {
    fn new(config: SyncConfig, endpoint: Arc<E>) -> Self {
        Self {
            config,
            endpoint,
            persistence: None,
            network: None,
            cipher: None,
            local: None,
            codecs: CodecRegistry::new(),
            resolver: ConflictResolver::new(),
        }
    }

    /// Sets the persistence adapter. Defaults to a fresh [`MemoryStore`].
    pub fn persistence(mut self, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        self.persistence = Some(adapter);
        self
    }

    /// Sets the network observer. Defaults to an online [`NetworkMonitor`].
    pub fn network(mut self, observer: Arc<dyn NetworkObserver>) -> Self {
        self.network = Some(observer);
        self
    }

    /// Sets the payload cipher. Required when encryption is enabled.
    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Sets the hook receiving resolved documents.
    pub fn local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Sets the codec registry. Defaults to JSON for every entity type.
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Registers a merge function for one entity type.
    pub fn merger(
        mut self,
        entity_type: impl Into<String>,
        merger: impl EntityMerger + 'static,
    ) -> Self {
        self.resolver = self.resolver.with_merger(entity_type, merger);
        self
    }

    /// Loads persisted state and builds the coordinator.
    ///
    /// Records persisted mid-upload are returned to `pending`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] for an invalid configuration
    /// - [`SyncError::Encryption`] if encryption is enabled without a cipher
    /// - [`SyncError::Persistence`] if persisted state cannot be read
    pub fn build(self) -> SyncResult<SyncCoordinator<E>> {
        self.config.validate()?;

        let cipher = self
            .cipher
            .unwrap_or_else(|| Arc::new(PassthroughCipher) as Arc<dyn Cipher>);
        if self.config.encryption_enabled && !cipher.is_active() {
            return Err(SyncError::Encryption(
                "encryption enabled but no cipher is configured".into(),
            ));
        }

        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn PersistenceAdapter>);
        let mut queue = OperationQueue::from_records(persistence.load_queue()?);
        let conflicts = persistence.load_conflicts()?;

        let recovered = queue.recover_interrupted();
        if recovered > 0 {
            warn!(recovered, "recovered records interrupted mid-upload");
            write_with_retry(self.config.persist_attempts, "queue", || {
                persistence.save_queue(queue.records())
            })?;
        }
        info!(
            queue_length = queue.len(),
            conflicts = conflicts.len(),
            "sync state loaded"
        );

        let envelope = Envelope::new(self.codecs, cipher);
        let capacity_warning = queue.is_over_capacity(self.config.queue_capacity_warning_threshold);

        Ok(SyncCoordinator {
            uploader: BatchUploader::new(self.endpoint, envelope.clone()),
            envelope,
            resolver: self.resolver,
            persistence,
            network: self
                .network
                .unwrap_or_else(|| Arc::new(NetworkMonitor::new(true)) as Arc<dyn NetworkObserver>),
            local: self
                .local
                .unwrap_or_else(|| Arc::new(NoopLocalStore) as Arc<dyn LocalStore>),
            state: Mutex::new(EngineState { queue, conflicts }),
            status: Mutex::new(StatusLog {
                capacity_warning,
                ..StatusLog::default()
            }),
            config: RwLock::new(self.config),
            syncing: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::local::MemoryLocalStore;
    use crate::transport::MockEndpoint;
    use offsync_protocol::{ConflictStrategy, RecordStatus};
    use serde_json::json;

    fn config() -> SyncConfig {
        SyncConfig::new("device-a").with_retry(RetryConfig::immediate())
    }

    fn engine_with(
        config: SyncConfig,
        store: &Arc<MemoryStore>,
    ) -> (SyncCoordinator<MockEndpoint>, Arc<MockEndpoint>) {
        let endpoint = Arc::new(MockEndpoint::new());
        let engine = SyncCoordinator::builder(config, Arc::clone(&endpoint))
            .persistence(Arc::clone(store) as Arc<dyn PersistenceAdapter>)
            .build()
            .unwrap();
        (engine, endpoint)
    }

    fn create(engine: &SyncCoordinator<MockEndpoint>, entity_id: &str) -> Uuid {
        engine
            .queue_operation(
                OperationKind::Create,
                "profile",
                entity_id,
                &json!({"id": entity_id}),
                "user-1",
            )
            .unwrap()
    }

    #[test]
    fn enqueue_persists_before_returning() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(config(), &store);

        let id = create(&engine, "a");

        let persisted = store.load_queue().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, id);
        assert_eq!(persisted[0].status, RecordStatus::Pending);
        assert_eq!(persisted[0].origin_device, "device-a");
    }

    #[test]
    fn enqueue_retries_transient_write_failures() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(config().with_persist_attempts(3), &store);
        store.fail_next_writes(2);

        create(&engine, "a");
        assert_eq!(engine.queue_len(), 1);
    }

    #[test]
    fn enqueue_reports_persistence_failure() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(config().with_persist_attempts(2), &store);
        store.fail_next_writes(2);

        let result = engine.queue_operation(
            OperationKind::Create,
            "profile",
            "a",
            &json!({}),
            "user-1",
        );

        assert!(matches!(
            result,
            Err(SyncError::Persistence { attempts: 2, .. })
        ));
        assert_eq!(engine.queue_len(), 0);
        assert_eq!(engine.get_sync_status().errors.len(), 1);
    }

    #[test]
    fn enqueue_rejects_empty_ids() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(config(), &store);

        let result = engine.queue_operation(OperationKind::Create, "", "a", &json!({}), "u");
        assert!(matches!(result, Err(SyncError::Validation(_))));
    }

    #[test]
    fn capacity_warning_is_raised_and_cleared() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(config().with_capacity_warning_threshold(2), &store);

        create(&engine, "a");
        create(&engine, "b");
        assert!(!engine.get_sync_status().capacity_warning);

        create(&engine, "c");
        assert!(engine.get_sync_status().capacity_warning);
        assert_eq!(engine.queue_len(), 3);

        engine.clear_sync_queue().unwrap();
        assert!(!engine.get_sync_status().capacity_warning);
    }

    #[tokio::test]
    async fn sync_uploads_and_prunes() {
        let store = Arc::new(MemoryStore::new());
        let (engine, endpoint) = engine_with(config().with_batch_size(2), &store);
        for id in ["a", "b", "c"] {
            create(&engine, id);
        }

        let summary = engine.perform_sync().await;

        assert_eq!(
            summary,
            SyncSummary {
                attempted: 3,
                success: 3,
                failed: 0,
                conflicts: 0
            }
        );
        assert_eq!(endpoint.call_count(), 2);
        assert_eq!(engine.queue_len(), 0);
        assert!(store.load_queue().unwrap().is_empty());
        assert!(engine.get_sync_status().last_sync.is_some());
    }

    #[tokio::test]
    async fn failed_entity_holds_later_batches() {
        let store = Arc::new(MemoryStore::new());
        let (engine, endpoint) = engine_with(config().with_batch_size(1), &store);
        endpoint.fail_entity("a", "busy", 1);
        let first = create(&engine, "a");
        let second = engine
            .queue_operation(
                OperationKind::Update,
                "profile",
                "a",
                &json!({"v": 2}),
                "user-1",
            )
            .unwrap();

        let summary = engine.perform_sync().await;
        assert_eq!(summary.attempted, 1);
        assert_eq!(endpoint.uploaded_ids(), vec![first]);

        let summary = engine.perform_sync().await;
        assert_eq!(summary.success, 2);
        assert_eq!(endpoint.uploaded_ids(), vec![first, first, second]);
    }

    #[tokio::test]
    async fn same_entity_records_never_share_a_batch() {
        let store = Arc::new(MemoryStore::new());
        let (engine, endpoint) = engine_with(config().with_batch_size(10), &store);
        let first = create(&engine, "a");
        let second = engine
            .queue_operation(
                OperationKind::Update,
                "profile",
                "a",
                &json!({"v": 2}),
                "user-1",
            )
            .unwrap();
        let other = create(&engine, "b");

        let summary = engine.perform_sync().await;

        assert_eq!(summary.success, 3);
        assert_eq!(endpoint.call_count(), 2);
        let requests = endpoint.requests();
        let first_batch: Vec<_> = requests[0].operations.iter().map(|o| o.id).collect();
        assert_eq!(first_batch, vec![first, other]);
        assert_eq!(requests[1].operations[0].id, second);
    }

    #[tokio::test]
    async fn resolution_goes_before_newer_edits() {
        let store = Arc::new(MemoryStore::new());
        let (engine, endpoint) = engine_with(
            config()
                .with_batch_size(1)
                .with_strategy(ConflictStrategy::ClientWins),
            &store,
        );
        endpoint.conflict_once("a", json!({"v": 0}));
        create(&engine, "a");
        let newer = engine
            .queue_operation(
                OperationKind::Update,
                "profile",
                "a",
                &json!({"v": 2}),
                "user-1",
            )
            .unwrap();

        let summary = engine.perform_sync().await;
        assert_eq!(summary.conflicts, 1);
        let records = engine.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, OperationKind::Update);
        assert_eq!(records[1].id, newer);

        engine.perform_sync().await;
        let uploaded = endpoint.uploaded_ids();
        assert_eq!(uploaded.last(), Some(&newer));
        assert_eq!(engine.queue_len(), 0);
    }

    #[tokio::test]
    async fn automatic_resolution_requeues_update() {
        let store = Arc::new(MemoryStore::new());
        let local = Arc::new(MemoryLocalStore::new());
        let endpoint = Arc::new(MockEndpoint::new());
        let engine = SyncCoordinator::builder(
            config().with_strategy(ConflictStrategy::ClientWins),
            Arc::clone(&endpoint),
        )
        .persistence(Arc::clone(&store) as Arc<dyn PersistenceAdapter>)
        .local_store(Arc::clone(&local) as Arc<dyn LocalStore>)
        .build()
        .unwrap();

        endpoint.conflict_once("a", json!({"id": "remote"}));
        let original = create(&engine, "a");

        let summary = engine.perform_sync().await;
        assert_eq!(summary.conflicts, 1);

        let records = engine.records();
        assert_eq!(records.len(), 1);
        assert_ne!(records[0].id, original);
        assert_eq!(records[0].operation, OperationKind::Update);
        assert_eq!(records[0].origin_user, "user-1");
        assert_eq!(local.get("profile", "a"), Some(json!({"id": "a"})));
        assert!(engine.pending_conflicts().is_empty());
        assert_eq!(store.archived().len(), 1);
        assert!(store.load_conflicts().unwrap().is_empty());

        engine.perform_sync().await;
        assert_eq!(engine.queue_len(), 0);
    }

    #[tokio::test]
    async fn manual_conflict_waits_for_decision() {
        let store = Arc::new(MemoryStore::new());
        let (engine, endpoint) =
            engine_with(config().with_strategy(ConflictStrategy::Manual), &store);
        endpoint.conflict_once("a", json!({"id": "remote"}));
        create(&engine, "a");

        engine.perform_sync().await;
        let pending = engine.pending_conflicts();
        assert_eq!(pending.len(), 1);
        assert_eq!(engine.get_sync_status().conflict_count, 1);
        assert_eq!(store.load_conflicts().unwrap().len(), 1);

        let record_id = engine
            .apply_manual_resolution(pending[0].id, json!({"id": "chosen"}))
            .unwrap();

        assert!(engine.pending_conflicts().is_empty());
        let records = engine.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, record_id);
        assert_eq!(store.archived()[0].resolved_payload, Some(json!({"id": "chosen"})));

        let again = engine.apply_manual_resolution(pending[0].id, json!({}));
        assert!(matches!(again, Err(SyncError::ConflictNotFound(_))));
    }

    #[tokio::test]
    async fn ignore_conflict_archives_without_requeue() {
        let store = Arc::new(MemoryStore::new());
        let (engine, endpoint) =
            engine_with(config().with_strategy(ConflictStrategy::Manual), &store);
        endpoint.conflict_once("a", json!({}));
        create(&engine, "a");
        engine.perform_sync().await;

        let conflict_id = engine.pending_conflicts()[0].id;
        engine.ignore_conflict(conflict_id).unwrap();

        assert_eq!(engine.queue_len(), 0);
        assert!(engine.pending_conflicts().is_empty());
        assert_eq!(
            store.archived()[0].status,
            offsync_protocol::ConflictStatus::Ignored
        );
    }

    #[tokio::test]
    async fn retry_failed_resets_terminal_records() {
        let store = Arc::new(MemoryStore::new());
        let (engine, endpoint) = engine_with(config().with_max_retries(1), &store);
        endpoint.fail_entity("a", "busy", 1);
        create(&engine, "a");

        engine.perform_sync().await;
        assert_eq!(engine.records()[0].status, RecordStatus::Failed);
        assert!(engine.perform_sync().await.is_empty());

        assert_eq!(engine.retry_failed().unwrap(), 1);
        let summary = engine.perform_sync().await;
        assert_eq!(summary.success, 1);
    }

    #[tokio::test]
    async fn offline_sync_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let endpoint = Arc::new(MockEndpoint::new());
        let network = Arc::new(NetworkMonitor::new(false));
        let engine = SyncCoordinator::builder(config(), Arc::clone(&endpoint))
            .persistence(Arc::clone(&store) as Arc<dyn PersistenceAdapter>)
            .network(Arc::clone(&network) as Arc<dyn NetworkObserver>)
            .build()
            .unwrap();
        create(&engine, "a");

        assert!(engine.perform_sync().await.is_empty());
        assert!(matches!(engine.force_sync().await, Err(SyncError::Offline)));
        assert_eq!(endpoint.call_count(), 0);

        network.set_online(true);
        assert_eq!(engine.force_sync().await.unwrap().success, 1);
    }

    #[test]
    fn update_config_validates() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(config(), &store);

        let next = engine
            .update_config(SyncConfigUpdate {
                batch_size: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(next.batch_size, 5);
        assert_eq!(engine.config().batch_size, 5);

        let invalid = engine.update_config(SyncConfigUpdate {
            batch_size: Some(0),
            ..Default::default()
        });
        assert!(matches!(invalid, Err(SyncError::Validation(_))));

        let encrypt = engine.update_config(SyncConfigUpdate {
            encryption_enabled: Some(true),
            ..Default::default()
        });
        assert!(matches!(encrypt, Err(SyncError::Encryption(_))));
        assert_eq!(engine.config().batch_size, 5);
    }

    #[test]
    fn build_requires_cipher_for_encryption() {
        let result = SyncCoordinator::builder(
            config().with_encryption(true),
            Arc::new(MockEndpoint::new()),
        )
        .build();
        assert!(matches!(result, Err(SyncError::Encryption(_))));
    }

    #[test]
    fn status_errors_are_bounded() {
        let store = Arc::new(MemoryStore::new());
        let mut cfg = config();
        cfg.max_status_errors = 2;
        let (engine, _) = engine_with(cfg, &store);

        engine.record_errors(vec!["one".into(), "two".into(), "three".into()]);
        assert_eq!(engine.get_sync_status().errors, vec!["two", "three"]);
    }
}
