//! # offsync protocol
//!
//! Data model and wire contract for the offsync engine.
//!
//! This crate provides:
//! - [`SyncRecord`], one durably queued mutation
//! - [`ConflictRecord`], one detected divergence between local and remote state
//! - Batch upload messages ([`BatchRequest`], [`BatchResponse`])
//! - The tagged [`Payload`] envelope and per-entity-type codecs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod messages;
mod payload;
mod record;

pub use conflict::{ConflictRecord, ConflictStatus, ConflictStrategy};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{BatchRequest, BatchResponse, OperationResult, Outcome, WireOperation};
pub use payload::{CborCodec, CodecRegistry, Document, EntityCodec, JsonCodec, Payload};
pub use record::{OperationKind, RecordStatus, SyncRecord};

pub use uuid::Uuid;

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
