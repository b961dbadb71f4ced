//! # offsync engine
//!
//! Offline-first synchronization: every local mutation is durably queued,
//! uploaded in batches when the network allows, and reconciled with the
//! remote store when the two diverge.
//!
//! This crate provides:
//! - [`OperationQueue`], the FIFO of pending mutations
//! - [`SyncCoordinator`], owner of the queue and of the sync cycle
//! - [`BatchUploader`], batch submission and per-record bookkeeping
//! - [`ConflictResolver`], strategy-based and field-wise conflict resolution
//! - [`NetworkMonitor`], a transition-notifying reachability observer
//! - [`HttpEndpoint`] and [`MockEndpoint`] remote endpoints
//!
//! ## Key Invariants
//!
//! - A mutation is persisted before `queue_operation` returns
//! - Records of one entity are uploaded in the order they were queued
//! - Retries are bounded by `max_retries` with exponential backoff
//! - At most one sync cycle runs at a time
//! - Completed records never outlive the cycle that completed them

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod envelope;
mod error;
mod http;
mod local;
mod network;
mod queue;
mod resolver;
mod runner;
mod transport;
mod uploader;

pub use config::{RetryConfig, SyncConfig, SyncConfigUpdate};
pub use coordinator::{SyncCoordinator, SyncCoordinatorBuilder, SyncState, SyncStatus, SyncSummary};
pub use envelope::Envelope;
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpEndpoint, LoopbackClient, LoopbackServer};
pub use local::{LocalStore, MemoryLocalStore, NoopLocalStore};
pub use network::{NetworkListener, NetworkMonitor, NetworkObserver, SubscriptionId};
pub use queue::{OperationQueue, QueueCounts};
pub use resolver::{merge_documents, ConflictResolver, EntityMerger, FieldMerger, MergeContext};
pub use runner::SyncHandle;
pub use transport::{MockEndpoint, RemoteEndpoint};
pub use uploader::{apply_outcomes, BatchReport, BatchUploader, RecordOutcome};
