//! Batch upload and per-record outcome bookkeeping.

use crate::config::SyncConfig;
use crate::envelope::Envelope;
use crate::error::SyncError;
use crate::queue::OperationQueue;
use crate::transport::RemoteEndpoint;
use offsync_protocol::{
    now_millis, BatchRequest, ConflictRecord, Document, Outcome, RecordStatus, SyncRecord,
    WireOperation,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What happened to one record of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Applied remotely.
    Success,
    /// The remote store holds a divergent version.
    Conflict {
        /// Decoded local document that was uploaded.
        local: Document,
        /// Remote version.
        remote: Document,
        /// Write time of the remote version, if the server reported one.
        remote_timestamp: Option<u64>,
    },
    /// The remote store refused this record.
    Failed {
        /// Diagnostic message.
        message: String,
        /// False for validation failures.
        retryable: bool,
    },
    /// The batch as a whole never got a usable answer.
    TransportFailed {
        /// Diagnostic message.
        message: String,
    },
}

/// Counts and artifacts of one applied batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Records now `completed`.
    pub success: usize,
    /// Records that failed, retryable or not.
    pub failed: usize,
    /// Conflicts raised by this batch.
    pub conflicts: Vec<ConflictRecord>,
    /// Entities with a failed or conflicting record in this batch.
    pub held_entities: HashSet<(String, String)>,
    /// Messages worth surfacing in the sync status.
    pub errors: Vec<String>,
}

/// Uploads batches of records to a [`RemoteEndpoint`].
pub struct BatchUploader<E: RemoteEndpoint> {
    endpoint: Arc<E>,
    envelope: Envelope,
}

impl<E: RemoteEndpoint> BatchUploader<E> {
    /// Creates an uploader.
    pub fn new(endpoint: Arc<E>, envelope: Envelope) -> Self {
        Self { endpoint, envelope }
    }

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &Arc<E> {
        &self.endpoint
    }

    /// Uploads `batch` and returns one outcome per record, in batch order.
    ///
    /// Never fails as a whole: a record whose payload cannot be opened is
    /// reported as a non-retryable failure and left out of the request, and
    /// an endpoint error, a timeout or a misaligned response turns every sent
    /// record into [`RecordOutcome::TransportFailed`]. An endpoint error that
    /// is not retryable, such as a request that cannot be encoded, fails
    /// every sent record as rejected instead.
    pub async fn submit(
        &self,
        batch: &[SyncRecord],
        device_id: &str,
        timeout: Duration,
    ) -> Vec<RecordOutcome> {
        let mut outcomes: Vec<Option<RecordOutcome>> = (0..batch.len()).map(|_| None).collect();
        let mut operations = Vec::with_capacity(batch.len());
        let mut sent: Vec<(usize, Document)> = Vec::with_capacity(batch.len());

        for (index, record) in batch.iter().enumerate() {
            match self.envelope.open(&record.payload) {
                Ok(document) => {
                    operations.push(WireOperation {
                        id: record.id,
                        operation: record.operation,
                        entity_type: record.entity_type.clone(),
                        entity_id: record.entity_id.clone(),
                        data: document.clone(),
                        timestamp: record.created_at,
                    });
                    sent.push((index, document));
                }
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "queued payload cannot be opened");
                    outcomes[index] = Some(RecordOutcome::Failed {
                        message: format!("unreadable payload: {e}"),
                        retryable: false,
                    });
                }
            }
        }

        if !operations.is_empty() {
            let expected = operations.len();
            let request = BatchRequest::new(device_id, now_millis(), operations);

            let reply = match tokio::time::timeout(timeout, self.endpoint.submit(request)).await {
                Ok(Ok(response)) if response.results.len() == expected => Ok(response),
                Ok(Ok(response)) => Err((
                    format!(
                        "response carried {} results for {expected} operations",
                        response.results.len()
                    ),
                    true,
                )),
                Ok(Err(e)) => Err((e.to_string(), e.is_retryable())),
                Err(_) => Err((SyncError::Timeout(timeout).to_string(), true)),
            };

            match reply {
                Ok(response) => {
                    for ((index, local), result) in sent.into_iter().zip(response.results) {
                        outcomes[index] = Some(match result.outcome() {
                            Outcome::Success => RecordOutcome::Success,
                            Outcome::Conflict {
                                remote_data,
                                remote_timestamp,
                            } => RecordOutcome::Conflict {
                                local,
                                remote: remote_data,
                                remote_timestamp,
                            },
                            Outcome::Error { message, retryable } => {
                                RecordOutcome::Failed { message, retryable }
                            }
                        });
                    }
                }
                Err((message, true)) => {
                    warn!(size = expected, error = %message, "batch upload failed");
                    for (index, _) in sent {
                        outcomes[index] = Some(RecordOutcome::TransportFailed {
                            message: message.clone(),
                        });
                    }
                }
                Err((message, false)) => {
                    warn!(size = expected, error = %message, "batch refused by endpoint");
                    for (index, _) in sent {
                        outcomes[index] = Some(RecordOutcome::Failed {
                            message: message.clone(),
                            retryable: false,
                        });
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| RecordOutcome::TransportFailed {
                    message: "no outcome reported".into(),
                })
            })
            .collect()
    }
}

impl<E: RemoteEndpoint> std::fmt::Debug for BatchUploader<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUploader")
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

/// Applies the outcomes of an uploaded batch to the queue.
///
/// Records removed or re-queued while the batch was in flight are skipped.
pub fn apply_outcomes(
    queue: &mut OperationQueue,
    batch: &[SyncRecord],
    outcomes: Vec<RecordOutcome>,
    config: &SyncConfig,
    now: u64,
) -> BatchReport {
    let mut report = BatchReport::default();
    let mut transport_reported = false;

    for (snapshot, outcome) in batch.iter().zip(outcomes) {
        let Some(record) = queue.get_mut(&snapshot.id) else {
            debug!(record_id = %snapshot.id, "record left the queue during upload");
            continue;
        };
        if record.status != RecordStatus::Syncing {
            continue;
        }
        let entity = (record.entity_type.clone(), record.entity_id.clone());

        match outcome {
            RecordOutcome::Success => {
                transition(record, RecordStatus::Completed);
                record.last_error = None;
                record.next_attempt_at = None;
                report.success += 1;
            }
            RecordOutcome::Conflict {
                local,
                remote,
                remote_timestamp,
            } => {
                transition(record, RecordStatus::Conflict);
                record.next_attempt_at = None;
                record.last_error = Some(
                    SyncError::Conflict {
                        entity_type: entity.0.clone(),
                        entity_id: entity.1.clone(),
                    }
                    .to_string(),
                );
                report.conflicts.push(ConflictRecord::new(
                    record.id,
                    record.operation,
                    record.entity_type.clone(),
                    record.entity_id.clone(),
                    local,
                    remote,
                    record.created_at,
                    remote_timestamp.unwrap_or(now),
                    config.strategy,
                ));
                report.held_entities.insert(entity);
            }
            RecordOutcome::Failed { message, retryable } => {
                record.retry_count += 1;
                if !retryable {
                    record.rejected = true;
                    record.next_attempt_at = None;
                    transition(record, RecordStatus::Failed);
                    report
                        .errors
                        .push(format!("{}/{} rejected: {message}", entity.0, entity.1));
                } else if record.retry_count < config.max_retries {
                    record.next_attempt_at = Some(backoff_deadline(config, record.retry_count, now));
                    transition(record, RecordStatus::Pending);
                } else {
                    record.next_attempt_at = None;
                    transition(record, RecordStatus::Failed);
                    report.errors.push(format!(
                        "{}/{} gave up after {} attempts: {message}",
                        entity.0, entity.1, record.retry_count
                    ));
                }
                record.last_error = Some(message);
                report.failed += 1;
                report.held_entities.insert(entity);
            }
            RecordOutcome::TransportFailed { message } => {
                record.retry_count += 1;
                record.next_attempt_at = (record.retry_count < config.max_retries)
                    .then(|| backoff_deadline(config, record.retry_count, now));
                transition(record, RecordStatus::Failed);
                if !transport_reported {
                    report.errors.push(format!("batch upload failed: {message}"));
                    transport_reported = true;
                }
                record.last_error = Some(message);
                report.failed += 1;
                report.held_entities.insert(entity);
            }
        }
    }

    report
}

fn transition(record: &mut SyncRecord, next: RecordStatus) {
    if let Err(e) = record.set_status(next) {
        warn!(record_id = %record.id, error = %e, "unexpected record transition");
    }
}

fn backoff_deadline(config: &SyncConfig, attempt: u32, now: u64) -> u64 {
    let delay = config.retry.delay_for_attempt(attempt);
    now.saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
}
