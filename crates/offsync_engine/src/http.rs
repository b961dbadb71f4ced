//! HTTP endpoint implementation.
//!
//! The actual HTTP client is abstracted via a trait so any client library
//! (reqwest, hyper, a platform bridge) can carry the JSON bodies.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteEndpoint;
use offsync_protocol::{BatchRequest, BatchResponse};
use parking_lot::RwLock;
use std::future::Future;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a POST request with a JSON body and returns the response body.
    ///
    /// Implementations map non-2xx statuses to `Err`.
    fn post(&self, url: &str, body: Vec<u8>)
        -> impl Future<Output = Result<Vec<u8>, String>> + Send;
}

/// Batch upload endpoint over HTTP with JSON bodies.
pub struct HttpEndpoint<C: HttpClient> {
    url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpEndpoint<C> {
    /// Creates an endpoint posting to `url`.
    pub fn new(url: impl Into<String>, client: C) -> Self {
        Self {
            url: url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the upload URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

impl<C: HttpClient> RemoteEndpoint for HttpEndpoint<C> {
    async fn submit(&self, request: BatchRequest) -> SyncResult<BatchResponse> {
        let body = request.encode()?;

        let response_body = match self.client.post(&self.url, body).await {
            Ok(body) => body,
            Err(e) => {
                *self.last_error.write() = Some(e.clone());
                return Err(SyncError::transient(e));
            }
        };
        *self.last_error.write() = None;

        BatchResponse::decode(&response_body)
            .map_err(|e| SyncError::transient(format!("unreadable batch response: {e}")))
    }
}

/// Server side of a [`LoopbackClient`].
pub trait LoopbackServer: Send + Sync + 'static {
    /// Handles one POST request body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An HTTP client that calls an in-process server directly.
///
/// Useful for tests and for embedding the remote store in the same process.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a loopback client.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url
            .find("://")
            .and_then(|scheme| url[scheme + 3..].find('/').map(|i| &url[scheme + 3 + i..]))
            .unwrap_or(url);
        self.server.handle_post(path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{OperationKind, OperationResult, Uuid, WireOperation};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingServer {
        paths: Mutex<Vec<String>>,
        fail: Mutex<bool>,
        garbage: Mutex<bool>,
    }

    impl LoopbackServer for RecordingServer {
        fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
            self.paths.lock().push(path.to_string());
            if *self.fail.lock() {
                return Err("503 service unavailable".into());
            }
            if *self.garbage.lock() {
                return Ok(b"<html>".to_vec());
            }
            let request = BatchRequest::decode(body).map_err(|e| e.to_string())?;
            let results = request
                .operations
                .iter()
                .map(|op| {
                    if op.entity_id == "taken" {
                        OperationResult::conflict(json!({"owner": "someone else"}))
                    } else {
                        OperationResult::success()
                    }
                })
                .collect();
            BatchResponse::new(results).encode().map_err(|e| e.to_string())
        }
    }

    fn make_request(entity_ids: &[&str]) -> BatchRequest {
        let operations = entity_ids
            .iter()
            .map(|id| WireOperation {
                id: Uuid::new_v4(),
                operation: OperationKind::Create,
                entity_type: "note".into(),
                entity_id: (*id).into(),
                data: json!({"title": "hello"}),
                timestamp: 1,
            })
            .collect();
        BatchRequest::new("device-a", 1, operations)
    }

    #[tokio::test]
    async fn http_roundtrip_through_loopback() {
        let endpoint = HttpEndpoint::new(
            "https://sync.example.com/v1/batch",
            LoopbackClient::new(RecordingServer::default()),
        );

        let response = endpoint.submit(make_request(&["a", "taken"])).await.unwrap();

        assert!(response.results[0].success);
        assert_eq!(response.results[1].conflict, Some(true));
        assert_eq!(endpoint.client.server().paths.lock()[0], "/v1/batch");
        assert!(endpoint.last_error().is_none());
    }

    #[tokio::test]
    async fn http_client_failure_is_transient() {
        let server = RecordingServer::default();
        *server.fail.lock() = true;
        let endpoint = HttpEndpoint::new("https://sync.example.com/batch", LoopbackClient::new(server));

        let err = endpoint.submit(make_request(&["a"])).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(endpoint.last_error().as_deref(), Some("503 service unavailable"));
    }

    #[tokio::test]
    async fn http_unreadable_response_is_transient() {
        let server = RecordingServer::default();
        *server.garbage.lock() = true;
        let endpoint = HttpEndpoint::new("https://sync.example.com/batch", LoopbackClient::new(server));

        let err = endpoint.submit(make_request(&["a"])).await.unwrap_err();
        assert!(matches!(err, SyncError::TransientNetwork(_)));
    }
}
