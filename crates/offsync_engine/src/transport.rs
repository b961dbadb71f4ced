//! Remote endpoint abstraction for batch uploads.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::{BatchRequest, BatchResponse, Document, OperationResult, Uuid};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

/// The remote store that accepts batch uploads.
///
/// An implementation returns `Err` only when the batch as a whole could not
/// be delivered or answered; per-operation problems are reported inside the
/// [`BatchResponse`]. The engine bounds every call with its batch timeout.
pub trait RemoteEndpoint: Send + Sync + 'static {
    /// Submits one batch and returns one result per operation.
    fn submit(
        &self,
        request: BatchRequest,
    ) -> impl Future<Output = SyncResult<BatchResponse>> + Send;
}

#[derive(Debug, Clone)]
struct ScriptedError {
    message: String,
    retryable: bool,
    remaining: u32,
}

/// A scriptable in-process endpoint for testing.
///
/// By default every operation succeeds. Conflicts and errors are scripted
/// per entity ID; transport failures, delays and raw responses per call.
#[derive(Debug, Default)]
pub struct MockEndpoint {
    conflicts: Mutex<HashMap<String, (Document, Option<u64>)>>,
    errors: Mutex<HashMap<String, ScriptedError>>,
    failing_calls: Mutex<u32>,
    refusals: Mutex<VecDeque<String>>,
    delay: Mutex<Option<Duration>>,
    responses: Mutex<VecDeque<BatchResponse>>,
    requests: Mutex<Vec<BatchRequest>>,
}

impl MockEndpoint {
    /// Creates an endpoint that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a conflict with `server_data` for the next upload of `entity_id`.
    pub fn conflict_once(&self, entity_id: impl Into<String>, server_data: Document) {
        self.conflicts
            .lock()
            .insert(entity_id.into(), (server_data, None));
    }

    /// Like [`conflict_once`](Self::conflict_once), reporting that the
    /// remote version was written at `server_timestamp`.
    pub fn conflict_once_at(
        &self,
        entity_id: impl Into<String>,
        server_data: Document,
        server_timestamp: u64,
    ) {
        self.conflicts
            .lock()
            .insert(entity_id.into(), (server_data, Some(server_timestamp)));
    }

    /// Fails the next `times` uploads of `entity_id` with a retryable error.
    pub fn fail_entity(&self, entity_id: impl Into<String>, message: impl Into<String>, times: u32) {
        self.errors.lock().insert(
            entity_id.into(),
            ScriptedError {
                message: message.into(),
                retryable: true,
                remaining: times,
            },
        );
    }

    /// Rejects the next upload of `entity_id` as invalid.
    pub fn reject_entity(&self, entity_id: impl Into<String>, message: impl Into<String>) {
        self.errors.lock().insert(
            entity_id.into(),
            ScriptedError {
                message: message.into(),
                retryable: false,
                remaining: 1,
            },
        );
    }

    /// Fails the next `count` calls as a whole, as if the network dropped.
    pub fn fail_next_calls(&self, count: u32) {
        *self.failing_calls.lock() = count;
    }

    /// Refuses the next call with a non-retryable validation error.
    pub fn refuse_next_call(&self, message: impl Into<String>) {
        self.refusals.lock().push_back(message.into());
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Returns `response` verbatim for the next call.
    pub fn push_response(&self, response: BatchResponse) {
        self.responses.lock().push_back(response);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Record IDs in the order they were uploaded, across all calls.
    pub fn uploaded_ids(&self) -> Vec<Uuid> {
        self.requests
            .lock()
            .iter()
            .flat_map(|r| r.operations.iter().map(|op| op.id))
            .collect()
    }

    fn take_transport_failure(&self) -> bool {
        let mut failing = self.failing_calls.lock();
        if *failing > 0 {
            *failing -= 1;
            true
        } else {
            false
        }
    }

    fn result_for(&self, entity_id: &str) -> OperationResult {
        if let Some((server_data, timestamp)) = self.conflicts.lock().remove(entity_id) {
            let result = OperationResult::conflict(server_data);
            return match timestamp {
                Some(timestamp) => result.with_server_timestamp(timestamp),
                None => result,
            };
        }

        let mut errors = self.errors.lock();
        if let Some(scripted) = errors.get_mut(entity_id) {
            let result = if scripted.retryable {
                OperationResult::error(scripted.message.clone())
            } else {
                OperationResult::rejected(scripted.message.clone())
            };
            scripted.remaining = scripted.remaining.saturating_sub(1);
            if scripted.remaining == 0 {
                errors.remove(entity_id);
            }
            return result;
        }

        OperationResult::success()
    }
}

impl RemoteEndpoint for MockEndpoint {
    async fn submit(&self, request: BatchRequest) -> SyncResult<BatchResponse> {
        self.requests.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_transport_failure() {
            return Err(SyncError::transient("simulated network failure"));
        }
        let refusal = self.refusals.lock().pop_front();
        if let Some(message) = refusal {
            return Err(SyncError::Validation(message));
        }

        let scripted = self.responses.lock().pop_front();
        if let Some(response) = scripted {
            return Ok(response);
        }

        let results = request
            .operations
            .iter()
            .map(|op| self.result_for(&op.entity_id))
            .collect();
        Ok(BatchResponse::new(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{OperationKind, Outcome, WireOperation};
    use serde_json::json;

    fn make_request(entity_ids: &[&str]) -> BatchRequest {
        let operations = entity_ids
            .iter()
            .map(|id| WireOperation {
                id: Uuid::new_v4(),
                operation: OperationKind::Update,
                entity_type: "profile".into(),
                entity_id: (*id).into(),
                data: json!({}),
                timestamp: 1,
            })
            .collect();
        BatchRequest::new("device-a", 1, operations)
    }

    #[tokio::test]
    async fn mock_accepts_by_default() {
        let endpoint = MockEndpoint::new();
        let response = endpoint.submit(make_request(&["a", "b"])).await.unwrap();

        assert_eq!(response.results.len(), 2);
        assert!(response.results.iter().all(|r| r.success));
        assert_eq!(endpoint.call_count(), 1);
    }

    #[tokio::test]
    async fn mock_conflict_is_one_shot() {
        let endpoint = MockEndpoint::new();
        endpoint.conflict_once("a", json!({"xp": 80}));

        let first = endpoint.submit(make_request(&["a"])).await.unwrap();
        assert!(matches!(first.results[0].outcome(), Outcome::Conflict { .. }));

        let second = endpoint.submit(make_request(&["a"])).await.unwrap();
        assert_eq!(second.results[0].outcome(), Outcome::Success);
    }

    #[tokio::test]
    async fn mock_entity_errors_count_down() {
        let endpoint = MockEndpoint::new();
        endpoint.fail_entity("a", "busy", 2);
        endpoint.reject_entity("b", "bad field");

        let first = endpoint.submit(make_request(&["a", "b"])).await.unwrap();
        assert!(matches!(
            first.results[0].outcome(),
            Outcome::Error { retryable: true, .. }
        ));
        assert!(matches!(
            first.results[1].outcome(),
            Outcome::Error { retryable: false, .. }
        ));

        let second = endpoint.submit(make_request(&["a", "b"])).await.unwrap();
        assert!(!second.results[0].success);
        assert!(second.results[1].success);

        let third = endpoint.submit(make_request(&["a"])).await.unwrap();
        assert!(third.results[0].success);
    }

    #[tokio::test]
    async fn mock_transport_failure() {
        let endpoint = MockEndpoint::new();
        endpoint.fail_next_calls(1);

        let result = endpoint.submit(make_request(&["a"])).await;
        assert!(matches!(result, Err(SyncError::TransientNetwork(_))));
        assert!(endpoint.submit(make_request(&["a"])).await.is_ok());
        assert_eq!(endpoint.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_refusal_is_not_retryable() {
        let endpoint = MockEndpoint::new();
        endpoint.refuse_next_call("payload too large");

        let err = endpoint.submit(make_request(&["a"])).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(!err.is_retryable());
        assert!(endpoint.submit(make_request(&["a"])).await.is_ok());
    }

    #[tokio::test]
    async fn mock_conflict_carries_server_timestamp() {
        let endpoint = MockEndpoint::new();
        endpoint.conflict_once_at("a", json!({"xp": 1}), 42);

        let response = endpoint.submit(make_request(&["a"])).await.unwrap();
        assert!(matches!(
            response.results[0].outcome(),
            Outcome::Conflict {
                remote_timestamp: Some(42),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn mock_scripted_response_is_returned_verbatim() {
        let endpoint = MockEndpoint::new();
        endpoint.push_response(BatchResponse::new(vec![]));

        let response = endpoint.submit(make_request(&["a"])).await.unwrap();
        assert!(response.results.is_empty());
    }
}
