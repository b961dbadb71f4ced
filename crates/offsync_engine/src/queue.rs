//! In-memory operation queue.
//!
//! The queue is an ordered list of [`SyncRecord`]s. It is owned by the
//! coordinator, which persists it through the adapter; the queue itself
//! performs no I/O.

use offsync_protocol::{RecordStatus, SyncRecord, Uuid};
use serde::Serialize;
use std::collections::HashSet;

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Waiting to be uploaded.
    pub pending: usize,
    /// Part of an in-flight batch.
    pub syncing: usize,
    /// Acknowledged, awaiting pruning.
    pub completed: usize,
    /// Failed, retryable or terminal.
    pub failed: usize,
    /// Waiting on conflict resolution.
    pub conflict: usize,
}

impl QueueCounts {
    /// Total number of records.
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.completed + self.failed + self.conflict
    }
}

/// FIFO queue of pending mutations.
#[derive(Debug, Clone, Default)]
pub struct OperationQueue {
    records: Vec<SyncRecord>,
}

impl OperationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a queue from persisted records, ordered by creation time.
    pub fn from_records(mut records: Vec<SyncRecord>) -> Self {
        records.sort_by_key(|r| r.created_at);
        Self { records }
    }

    /// Appends a record.
    pub fn push(&mut self, record: SyncRecord) {
        self.records.push(record);
    }

    /// Puts `record` in the slot of the record with ID `id`, or appends it
    /// if there is no such record. Returns the record it displaced.
    pub fn replace(&mut self, id: &Uuid, record: SyncRecord) -> Option<SyncRecord> {
        match self.records.iter().position(|r| r.id == *id) {
            Some(index) => Some(std::mem::replace(&mut self.records[index], record)),
            None => {
                self.records.push(record);
                None
            }
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the queue holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in FIFO order.
    pub fn records(&self) -> &[SyncRecord] {
        &self.records
    }

    /// Looks up a record.
    pub fn get(&self, id: &Uuid) -> Option<&SyncRecord> {
        self.records.iter().find(|r| r.id == *id)
    }

    /// Looks up a record for mutation.
    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut SyncRecord> {
        self.records.iter_mut().find(|r| r.id == *id)
    }

    /// IDs of records that can be uploaded at `now`, in FIFO order.
    ///
    /// At most one record per entity is returned. A record is skipped while
    /// an older record for the same entity is ready, in flight, waiting out
    /// its backoff or waiting on conflict resolution, so one entity's
    /// mutations are never reordered.
    pub fn ready_ids(&self, now: u64, max_retries: u32) -> Vec<Uuid> {
        let mut waiting: HashSet<(&str, &str)> = HashSet::new();
        let mut ids = Vec::new();

        for record in &self.records {
            let entity = (record.entity_type.as_str(), record.entity_id.as_str());
            if waiting.contains(&entity) {
                continue;
            }
            if record.is_ready(now, max_retries) {
                ids.push(record.id);
                waiting.insert(entity);
            } else if holds_entity(record, max_retries) {
                waiting.insert(entity);
            }
        }
        ids
    }

    /// Moves a ready record to `syncing` and returns a snapshot of it.
    ///
    /// Returns `None` if the record is gone or no longer ready.
    pub fn mark_syncing(&mut self, id: &Uuid, now: u64, max_retries: u32) -> Option<SyncRecord> {
        let record = self.get_mut(id)?;
        if !record.is_ready(now, max_retries) {
            return None;
        }
        if record.status == RecordStatus::Failed {
            record.set_status(RecordStatus::Pending).ok()?;
        }
        record.set_status(RecordStatus::Syncing).ok()?;
        Some(record.clone())
    }

    /// Drops completed records and conflict records whose conflict has been
    /// finalized. Returns the number removed.
    pub fn prune_completed(&mut self, finalized: &HashSet<Uuid>) -> usize {
        let before = self.records.len();
        self.records.retain(|r| match r.status {
            RecordStatus::Completed => false,
            RecordStatus::Conflict => !finalized.contains(&r.id),
            _ => true,
        });
        before - self.records.len()
    }

    /// Resets terminal-failed records to `pending` with a fresh retry budget.
    pub fn retry_terminal(&mut self, max_retries: u32) -> usize {
        let mut count = 0;
        for record in &mut self.records {
            if record.is_terminal_failed(max_retries)
                && record.set_status(RecordStatus::Pending).is_ok()
            {
                record.reset_retries();
                count += 1;
            }
        }
        count
    }

    /// Returns records left `syncing` by an interrupted cycle to `pending`.
    ///
    /// Retry counts are left untouched.
    pub fn recover_interrupted(&mut self) -> usize {
        let mut count = 0;
        for record in &mut self.records {
            if record.status == RecordStatus::Syncing
                && record.set_status(RecordStatus::Pending).is_ok()
            {
                count += 1;
            }
        }
        count
    }

    /// Removes every record. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }

    /// Returns true if the queue holds more than `threshold` records.
    pub fn is_over_capacity(&self, threshold: usize) -> bool {
        self.records.len() > threshold
    }

    /// Counts records per status.
    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in &self.records {
            match record.status {
                RecordStatus::Pending => counts.pending += 1,
                RecordStatus::Syncing => counts.syncing += 1,
                RecordStatus::Completed => counts.completed += 1,
                RecordStatus::Failed => counts.failed += 1,
                RecordStatus::Conflict => counts.conflict += 1,
            }
        }
        counts
    }
}

/// Whether a record that is not ready yet must still go before later
/// records of its entity.
fn holds_entity(record: &SyncRecord, max_retries: u32) -> bool {
    match record.status {
        RecordStatus::Pending | RecordStatus::Syncing | RecordStatus::Conflict => true,
        RecordStatus::Failed => record.is_retryable(max_retries),
        RecordStatus::Completed => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{OperationKind, Payload};

    fn make_record(entity_id: &str, created_at: u64) -> SyncRecord {
        SyncRecord::new(
            OperationKind::Update,
            "profile",
            entity_id,
            Payload::plain("profile", b"{}".to_vec()),
            "device-a",
            "user-1",
            created_at,
        )
    }

    fn fail(queue: &mut OperationQueue, id: &Uuid, retry_count: u32, next_attempt_at: Option<u64>) {
        let record = queue.mark_syncing(id, 0, 3).unwrap();
        let record = queue.get_mut(&record.id).unwrap();
        record.set_status(RecordStatus::Failed).unwrap();
        record.retry_count = retry_count;
        record.next_attempt_at = next_attempt_at;
    }

    #[test]
    fn from_records_orders_by_creation() {
        let queue = OperationQueue::from_records(vec![make_record("b", 20), make_record("a", 10)]);
        let ids: Vec<_> = queue.records().iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn ready_ids_are_fifo() {
        let mut queue = OperationQueue::new();
        let a = make_record("a", 1);
        let b = make_record("b", 2);
        let (ida, idb) = (a.id, b.id);
        queue.push(a);
        queue.push(b);

        assert_eq!(queue.ready_ids(0, 3), vec![ida, idb]);
    }

    #[test]
    fn backoff_holds_later_records_of_same_entity() {
        let mut queue = OperationQueue::new();
        let first = make_record("a", 1);
        let second = make_record("a", 2);
        let other = make_record("b", 3);
        let (first_id, second_id, other_id) = (first.id, second.id, other.id);
        queue.push(first);
        queue.push(second);
        queue.push(other);

        fail(&mut queue, &first_id, 1, Some(1_000));

        assert_eq!(queue.ready_ids(500, 3), vec![other_id]);
        assert_eq!(queue.ready_ids(1_000, 3), vec![first_id, other_id]);
        assert!(!queue.ready_ids(1_000, 3).contains(&second_id));
    }

    #[test]
    fn one_ready_record_per_entity() {
        let mut queue = OperationQueue::new();
        let first = make_record("a", 1);
        let second = make_record("a", 2);
        let other = make_record("b", 3);
        let (first_id, second_id, other_id) = (first.id, second.id, other.id);
        queue.push(first);
        queue.push(second);
        queue.push(other);

        assert_eq!(queue.ready_ids(0, 3), vec![first_id, other_id]);

        queue.mark_syncing(&first_id, 0, 3).unwrap();
        assert_eq!(queue.ready_ids(0, 3), vec![other_id]);

        queue.get_mut(&first_id).unwrap().set_status(RecordStatus::Completed).unwrap();
        assert_eq!(queue.ready_ids(0, 3), vec![second_id, other_id]);
    }

    #[test]
    fn conflict_holds_entity_until_replaced() {
        let mut queue = OperationQueue::new();
        let conflicted = make_record("a", 1);
        let newer = make_record("a", 2);
        let (conflicted_id, newer_id) = (conflicted.id, newer.id);
        queue.push(conflicted);
        queue.push(newer);

        queue.mark_syncing(&conflicted_id, 0, 3).unwrap();
        queue
            .get_mut(&conflicted_id)
            .unwrap()
            .set_status(RecordStatus::Conflict)
            .unwrap();
        assert!(queue.ready_ids(0, 3).is_empty());

        let resolution = make_record("a", 1);
        let resolution_id = resolution.id;
        let displaced = queue.replace(&conflicted_id, resolution).unwrap();
        assert_eq!(displaced.id, conflicted_id);

        let order: Vec<_> = queue.records().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![resolution_id, newer_id]);
        assert_eq!(queue.ready_ids(0, 3), vec![resolution_id]);
    }

    #[test]
    fn replace_missing_record_appends() {
        let mut queue = OperationQueue::new();
        queue.push(make_record("a", 1));
        let record = make_record("b", 2);
        let id = record.id;

        assert!(queue.replace(&Uuid::new_v4(), record).is_none());
        assert_eq!(queue.records()[1].id, id);
    }

    #[test]
    fn terminal_failure_does_not_hold_entity() {
        let mut queue = OperationQueue::new();
        let first = make_record("a", 1);
        let second = make_record("a", 2);
        let (first_id, second_id) = (first.id, second.id);
        queue.push(first);
        queue.push(second);

        fail(&mut queue, &first_id, 3, None);

        assert_eq!(queue.ready_ids(0, 3), vec![second_id]);
    }

    #[test]
    fn mark_syncing_revives_retryable_failure() {
        let mut queue = OperationQueue::new();
        let record = make_record("a", 1);
        let id = record.id;
        queue.push(record);
        fail(&mut queue, &id, 1, None);

        let snapshot = queue.mark_syncing(&id, 0, 3).unwrap();
        assert_eq!(snapshot.status, RecordStatus::Syncing);
        assert!(queue.mark_syncing(&id, 0, 3).is_none());
    }

    #[test]
    fn prune_keeps_unfinalized_conflicts() {
        let mut queue = OperationQueue::new();
        let done = make_record("a", 1);
        let conflicted = make_record("b", 2);
        let settled = make_record("c", 3);
        let (done_id, conflicted_id, settled_id) = (done.id, conflicted.id, settled.id);
        queue.push(done);
        queue.push(conflicted);
        queue.push(settled);

        for (id, status) in [
            (done_id, RecordStatus::Completed),
            (conflicted_id, RecordStatus::Conflict),
            (settled_id, RecordStatus::Conflict),
        ] {
            queue.mark_syncing(&id, 0, 3).unwrap();
            queue.get_mut(&id).unwrap().set_status(status).unwrap();
        }

        let finalized: HashSet<Uuid> = [settled_id].into_iter().collect();
        assert_eq!(queue.prune_completed(&finalized), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.records()[0].id, conflicted_id);
    }

    #[test]
    fn retry_terminal_resets_budget() {
        let mut queue = OperationQueue::new();
        let terminal = make_record("a", 1);
        let retryable = make_record("b", 2);
        let (terminal_id, retryable_id) = (terminal.id, retryable.id);
        queue.push(terminal);
        queue.push(retryable);
        fail(&mut queue, &terminal_id, 3, Some(99));
        fail(&mut queue, &retryable_id, 1, None);

        assert_eq!(queue.retry_terminal(3), 1);

        let record = queue.get(&terminal_id).unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.next_attempt_at, None);
        assert_eq!(queue.get(&retryable_id).unwrap().status, RecordStatus::Failed);
    }

    #[test]
    fn recover_interrupted_keeps_retry_count() {
        let mut queue = OperationQueue::new();
        let mut record = make_record("a", 1);
        record.retry_count = 2;
        let id = record.id;
        queue.push(record);
        queue.mark_syncing(&id, 0, 3).unwrap();

        assert_eq!(queue.recover_interrupted(), 1);
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.retry_count, 2);
    }

    #[test]
    fn counts_and_capacity() {
        let mut queue = OperationQueue::new();
        for i in 0..3 {
            queue.push(make_record(&format!("e{i}"), i));
        }

        assert_eq!(queue.counts().pending, 3);
        assert_eq!(queue.counts().total(), 3);
        assert!(queue.is_over_capacity(2));
        assert!(!queue.is_over_capacity(3));
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
    }
}
