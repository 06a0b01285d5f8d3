use crate::engine::AnonymizationEngine;
use crate::extract::{IdentifyingFieldSet, MetadataExtractor};
use crate::keys::{KeyError, KeyMaterial, KeyStore, RequestId};
use crate::methods::Method;
use crate::volume::{self, VolumeData, VolumeProcessingResult};
use crate::{parse_object, AnonymizationError};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The processing service could not be reached or failed outright.
    #[error("Processing service failure: {}", .0.to_lowercase())]
    Unavailable(String),

    /// The service rejected or could not complete the request.
    #[error("Processing failed: {}", .0.to_lowercase())]
    Rejected(String),

    /// Decryption-time key problem, local to this request.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The pending request was abandoned by its caller.
    #[error("request cancelled")]
    Cancelled,
}

/// A revocable token handed to the transport together with each request.
///
/// Revoking the token abandons the pending request: the transport stops
/// committing results and reports [`TransportError::Cancelled`], and the
/// session preserves the state displayed before the request started.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    revoked: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }
}

/// The command channel to the processing service.
///
/// Sessions treat the transport as opaque: requests carry raw file bytes
/// and come back as raw container bytes, a flat metadata mapping or
/// rendered slices. Implementations must not commit partial results once
/// the cancel token is revoked.
pub trait ProcessingTransport {
    /// Anonymize a container with the given method; the response is a
    /// binary container of the same format as the input.
    fn anonymize(
        &self,
        file: &[u8],
        method: Method,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, TransportError>;

    /// Recover the identifying metadata of an encrypted container using
    /// previously issued key material.
    fn decrypt(
        &self,
        file: &[u8],
        key: &[u8],
        cancel: &CancelToken,
    ) -> Result<IdentifyingFieldSet, TransportError>;

    /// Render the original and processed slice sets of a volume file.
    fn process_volume(
        &self,
        file: &[u8],
        cancel: &CancelToken,
    ) -> Result<VolumeProcessingResult, TransportError>;

    /// The serialized key material of the most recent encryption request.
    fn download_key(&self) -> Result<Vec<u8>, TransportError>;
}

/// In-process implementation of the processing service, backed by the
/// anonymization engine, a per-session key store and the volume module.
#[derive(Debug)]
pub struct LocalTransport {
    engine: AnonymizationEngine,
    keys: Mutex<KeyStore>,
}

impl LocalTransport {
    pub fn new(engine: AnonymizationEngine) -> Self {
        Self {
            engine,
            keys: Mutex::new(KeyStore::new()),
        }
    }

    pub fn engine(&self) -> &AnonymizationEngine {
        &self.engine
    }

    /// The key issued for a specific earlier request, if any.
    pub fn key_for_request(&self, request: RequestId) -> Option<KeyMaterial> {
        self.keys
            .lock()
            .ok()
            .and_then(|store| store.get(request).cloned())
    }

    fn store_key(&self, request: RequestId, key: KeyMaterial) -> Result<(), TransportError> {
        let mut store = self
            .keys
            .lock()
            .map_err(|_| TransportError::Unavailable("key store poisoned".into()))?;
        store.insert(request, key);
        Ok(())
    }

    fn parse(&self, file: &[u8]) -> Result<dicom_object::DefaultDicomObject, TransportError> {
        parse_object(file).map_err(|err| match err {
            AnonymizationError::ReadError(message) => TransportError::Rejected(message),
            other => TransportError::Rejected(format!("{other}")),
        })
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(AnonymizationEngine::default())
    }
}

impl ProcessingTransport for LocalTransport {
    fn anonymize(
        &self,
        file: &[u8],
        method: Method,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, TransportError> {
        if cancel.is_revoked() {
            return Err(TransportError::Cancelled);
        }

        let obj = self.parse(file)?;
        let result = self
            .engine
            .anonymize(&obj, method)
            .map_err(|err| TransportError::Rejected(format!("{err}")))?;

        // nothing is committed once the request was abandoned
        if cancel.is_revoked() {
            return Err(TransportError::Cancelled);
        }

        if let Some(key) = result.key {
            let request = RequestId::new();
            debug!("storing key material for request {request}");
            self.store_key(request, key)?;
        }

        let mut out = Vec::new();
        result
            .object
            .write_all(&mut out)
            .map_err(|err| TransportError::Rejected(format!("{err}")))?;
        Ok(out)
    }

    fn decrypt(
        &self,
        file: &[u8],
        key: &[u8],
        cancel: &CancelToken,
    ) -> Result<IdentifyingFieldSet, TransportError> {
        if cancel.is_revoked() {
            return Err(TransportError::Cancelled);
        }

        let key = KeyMaterial::deserialize(key)?;
        let obj = self.parse(file)?;

        let dictionary = self.engine.dictionary();
        let extractor = MetadataExtractor::new(dictionary);
        let mut recovered = extractor.extract(&obj);

        let tokens: Vec<_> = recovered
            .iter()
            .filter_map(|field| {
                field
                    .value
                    .as_deref()
                    .filter(|token| !token.is_empty())
                    .map(|token| (field.tag, token.to_string()))
            })
            .collect();
        for (tag, token) in tokens {
            let plaintext = key.decrypt_value(&token)?;
            recovered = recovered.with_value(tag, Some(plaintext));
        }

        if cancel.is_revoked() {
            return Err(TransportError::Cancelled);
        }

        Ok(recovered)
    }

    fn process_volume(
        &self,
        file: &[u8],
        cancel: &CancelToken,
    ) -> Result<VolumeProcessingResult, TransportError> {
        if cancel.is_revoked() {
            return Err(TransportError::Cancelled);
        }

        let data =
            VolumeData::from_slice(file).map_err(|err| TransportError::Rejected(format!("{err}")))?;
        let result =
            volume::process(&data).map_err(|err| TransportError::Rejected(format!("{err}")))?;

        if cancel.is_revoked() {
            return Err(TransportError::Cancelled);
        }

        Ok(result)
    }

    fn download_key(&self) -> Result<Vec<u8>, TransportError> {
        let store = self
            .keys
            .lock()
            .map_err(|_| TransportError::Unavailable("key store poisoned".into()))?;
        store
            .latest()
            .map(KeyMaterial::serialize)
            .ok_or_else(|| TransportError::Rejected("no key material has been issued".into()))
    }
}
