//! Batch upload messages exchanged with the remote sync endpoint.
//!
//! A [`BatchRequest`] carries an ordered list of operations; the matching
//! [`BatchResponse`] carries exactly one [`OperationResult`] per operation,
//! positionally aligned with the request.

use crate::error::ProtocolResult;
use crate::payload::Document;
use crate::record::OperationKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One operation inside a batch upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOperation {
    /// Record ID.
    pub id: Uuid,
    /// Kind of mutation.
    pub operation: OperationKind,
    /// Domain type of the entity.
    pub entity_type: String,
    /// Identifier of the entity.
    pub entity_id: String,
    /// Decoded mutation payload.
    pub data: Document,
    /// Enqueue time of the record (ms since epoch).
    pub timestamp: u64,
}

/// Batch upload request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Uploading device.
    pub device_id: String,
    /// Time the batch was assembled (ms since epoch).
    pub timestamp: u64,
    /// Operations in FIFO order.
    pub operations: Vec<WireOperation>,
}

impl BatchRequest {
    /// Creates a new batch request.
    pub fn new(device_id: impl Into<String>, timestamp: u64, operations: Vec<WireOperation>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            operations,
        }
    }

    /// Encodes to a JSON body.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from a JSON body.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Outcome of one operation as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    /// Whether the operation was applied.
    pub success: bool,
    /// Set when the remote store holds a divergent version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<bool>,
    /// Remote version of the entity, present on conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<Document>,
    /// When the remote version was written (ms since epoch), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<u64>,
    /// Error message, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `Some(false)` marks a failure that must not be retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl OperationResult {
    /// Creates a success result.
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Creates a conflict result carrying the remote version.
    pub fn conflict(server_data: Document) -> Self {
        Self {
            success: false,
            conflict: Some(true),
            server_data: Some(server_data),
            ..Default::default()
        }
    }

    /// Attaches the write time of the remote version.
    pub fn with_server_timestamp(mut self, timestamp: u64) -> Self {
        self.server_timestamp = Some(timestamp);
        self
    }

    /// Creates a retryable error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Creates a non-retryable (validation) error result.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            retryable: Some(false),
            ..Self::error(message)
        }
    }

    /// Classifies the raw result.
    ///
    /// A conflict flag takes precedence over `success`.
    pub fn outcome(&self) -> Outcome {
        if self.conflict == Some(true) {
            return Outcome::Conflict {
                remote_data: self.server_data.clone().unwrap_or(Document::Null),
                remote_timestamp: self.server_timestamp,
            };
        }
        if self.success {
            return Outcome::Success;
        }
        Outcome::Error {
            message: self
                .error
                .clone()
                .unwrap_or_else(|| "remote reported failure without a message".into()),
            retryable: self.retryable.unwrap_or(true),
        }
    }
}

/// Classified per-operation outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The operation was applied remotely.
    Success,
    /// The remote store holds a divergent version.
    Conflict {
        /// Remote version of the entity.
        remote_data: Document,
        /// Write time of the remote version, when the server reports it.
        remote_timestamp: Option<u64>,
    },
    /// The operation failed.
    Error {
        /// Diagnostic message.
        message: String,
        /// Whether an automatic retry is allowed.
        retryable: bool,
    },
}

/// Batch upload response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchResponse {
    /// One result per request operation, in request order.
    pub results: Vec<OperationResult>,
}

impl BatchResponse {
    /// Creates a response from results.
    pub fn new(results: Vec<OperationResult>) -> Self {
        Self { results }
    }

    /// Creates a response accepting every operation of `request`.
    pub fn all_success(request: &BatchRequest) -> Self {
        Self::new(
            request
                .operations
                .iter()
                .map(|_| OperationResult::success())
                .collect(),
        )
    }

    /// Returns true if there is exactly one result per request operation.
    pub fn is_aligned_with(&self, request: &BatchRequest) -> bool {
        self.results.len() == request.operations.len()
    }

    /// Encodes to a JSON body.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from a JSON body.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
