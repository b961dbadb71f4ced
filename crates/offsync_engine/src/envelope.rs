//! Sealing and opening of queued payloads.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::{CodecRegistry, Document, Payload};
use offsync_storage::Cipher;
use std::borrow::Cow;
use std::sync::Arc;

/// Turns documents into stored [`Payload`]s and back.
///
/// The entity type's codec serializes the document; the cipher encrypts the
/// bytes when encryption is requested and the cipher is active.
#[derive(Clone)]
pub struct Envelope {
    codecs: CodecRegistry,
    cipher: Arc<dyn Cipher>,
}

impl Envelope {
    /// Creates an envelope from codecs and a cipher.
    pub fn new(codecs: CodecRegistry, cipher: Arc<dyn Cipher>) -> Self {
        Self { codecs, cipher }
    }

    /// Returns true if sealed payloads will actually be encrypted.
    pub fn can_encrypt(&self) -> bool {
        self.cipher.is_active()
    }

    /// Serializes `document` and optionally encrypts it.
    ///
    /// # Errors
    ///
    /// [`SyncError::Validation`] if the codec cannot represent the document,
    /// [`SyncError::Encryption`] if encryption fails.
    pub fn seal(&self, entity_type: &str, document: &Document, encrypt: bool) -> SyncResult<Payload> {
        let bytes = self
            .codecs
            .encode(entity_type, document)
            .map_err(|e| SyncError::Validation(format!("cannot encode {entity_type}: {e}")))?;

        if encrypt && self.cipher.is_active() {
            Ok(Payload::sealed(entity_type, self.cipher.encrypt(&bytes)?))
        } else {
            Ok(Payload::plain(entity_type, bytes))
        }
    }

    /// Decrypts (if needed) and decodes a stored payload.
    pub fn open(&self, payload: &Payload) -> SyncResult<Document> {
        let bytes = if payload.encrypted {
            if !self.cipher.is_active() {
                return Err(SyncError::Encryption(
                    "payload is encrypted but no cipher is configured".into(),
                ));
            }
            Cow::Owned(self.cipher.decrypt(&payload.data)?)
        } else {
            Cow::Borrowed(payload.data.as_slice())
        };

        Ok(self.codecs.decode(&payload.entity_type, &bytes)?)
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("codecs", &self.codecs)
            .field("encrypting", &self.cipher.is_active())
            .finish()
    }
}
