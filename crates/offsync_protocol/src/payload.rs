//! Payload envelope and per-entity-type codecs.
//!
//! Mutations travel through the engine as a tagged [`Payload`] envelope:
//! the entity type plus the codec-serialized document, optionally sealed by
//! the encryption adapter. Documents are [`serde_json::Value`]s; their object
//! keys are kept sorted, so encoding equal documents yields equal bytes.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Decoded form of an entity payload.
pub type Document = serde_json::Value;

/// Tagged envelope around a serialized entity payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Entity type the payload belongs to; selects the codec.
    pub entity_type: String,
    /// Whether `data` is ciphertext produced by the encryption adapter.
    pub encrypted: bool,
    /// Codec output, or its ciphertext when `encrypted` is set.
    pub data: Vec<u8>,
}

impl Payload {
    /// Wraps plaintext codec output.
    pub fn plain(entity_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            entity_type: entity_type.into(),
            encrypted: false,
            data,
        }
    }

    /// Wraps ciphertext produced by the encryption adapter.
    pub fn sealed(entity_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            entity_type: entity_type.into(),
            encrypted: true,
            data,
        }
    }
}

/// Serializes documents of one entity type.
pub trait EntityCodec: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Encodes a document to bytes.
    fn encode(&self, document: &Document) -> ProtocolResult<Vec<u8>>;

    /// Decodes bytes previously produced by [`encode`](Self::encode).
    fn decode(&self, bytes: &[u8]) -> ProtocolResult<Document>;
}

/// JSON codec. The default for unregistered entity types.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EntityCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, document: &Document) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(document)?)
    }

    fn decode(&self, bytes: &[u8]) -> ProtocolResult<Document> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// CBOR codec for compact payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl EntityCodec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn encode(&self, document: &Document) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(document, &mut bytes).map_err(ProtocolError::cbor_encode)?;
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> ProtocolResult<Document> {
        ciborium::from_reader(bytes).map_err(ProtocolError::cbor_decode)
    }
}

/// Maps entity types to codecs, registered once at startup.
#[derive(Clone)]
pub struct CodecRegistry {
    default: Arc<dyn EntityCodec>,
    codecs: HashMap<String, Arc<dyn EntityCodec>>,
}

impl CodecRegistry {
    /// Creates a registry that encodes everything as JSON.
    pub fn new() -> Self {
        Self {
            default: Arc::new(JsonCodec),
            codecs: HashMap::new(),
        }
    }

    /// Replaces the fallback codec.
    pub fn with_default(mut self, codec: impl EntityCodec + 'static) -> Self {
        self.default = Arc::new(codec);
        self
    }

    /// Registers a codec for one entity type.
    pub fn with_codec(
        mut self,
        entity_type: impl Into<String>,
        codec: impl EntityCodec + 'static,
    ) -> Self {
        self.codecs.insert(entity_type.into(), Arc::new(codec));
        self
    }

    /// Returns the codec for `entity_type`.
    pub fn codec_for(&self, entity_type: &str) -> &dyn EntityCodec {
        self.codecs
            .get(entity_type)
            .map(|c| c.as_ref())
            .unwrap_or(self.default.as_ref())
    }

    /// Encodes a document with the codec registered for `entity_type`.
    pub fn encode(&self, entity_type: &str, document: &Document) -> ProtocolResult<Vec<u8>> {
        self.codec_for(entity_type).encode(document)
    }

    /// Decodes bytes with the codec registered for `entity_type`.
    pub fn decode(&self, entity_type: &str, bytes: &[u8]) -> ProtocolResult<Document> {
        self.codec_for(entity_type).decode(bytes)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<(&String, &'static str)> =
            self.codecs.iter().map(|(k, c)| (k, c.name())).collect();
        registered.sort();
        f.debug_struct("CodecRegistry")
            .field("default", &self.default.name())
            .field("codecs", &registered)
            .finish()
    }
}
