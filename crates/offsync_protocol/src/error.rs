//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or transitioning protocol types.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR encoding failed.
    #[error("cbor encode error: {0}")]
    CborEncode(String),

    /// CBOR decoding failed.
    #[error("cbor decode error: {0}")]
    CborDecode(String),

    /// A record was asked to move between two states the lifecycle forbids.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
}

impl ProtocolError {
    pub(crate) fn cbor_encode(err: impl std::fmt::Display) -> Self {
        Self::CborEncode(err.to_string())
    }

    pub(crate) fn cbor_decode(err: impl std::fmt::Display) -> Self {
        Self::CborDecode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_display() {
        let err = ProtocolError::InvalidTransition {
            from: "completed".into(),
            to: "syncing".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition from completed to syncing"
        );
    }
}
