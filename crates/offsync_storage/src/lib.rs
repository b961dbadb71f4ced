//! # offsync storage
//!
//! Persistence and encryption adapters consumed by the offsync engine.
//!
//! Adapters are **passive**: they store and return what they are given and
//! carry no sync logic.
//!
//! ## Available Adapters
//!
//! - [`MemoryStore`] - For testing and ephemeral engines
//! - [`FileStore`] - Crash-safe files in a directory, single writer
//! - [`PassthroughCipher`] - No-op encryption when disabled
//! - [`AesGcmCipher`] - AES-256-GCM encryption of payloads at rest
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{MemoryStore, PersistenceAdapter};
//!
//! let store = MemoryStore::new();
//! store.save_queue(&[]).unwrap();
//! assert!(store.load_queue().unwrap().is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod cipher;
mod error;
mod file;
mod memory;

pub use adapter::PersistenceAdapter;
pub use cipher::{
    AesGcmCipher, Cipher, EncryptionKey, PassthroughCipher, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
