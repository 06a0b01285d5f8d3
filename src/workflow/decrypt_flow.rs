use crate::dictionary::TagDictionary;
use crate::extract::{IdentifyingFieldSet, MetadataExtractor};
use crate::parse_object;
use crate::workflow::transport::{CancelToken, ProcessingTransport, TransportError};
use crate::workflow::{RequestOutcome, SelectedFile, WorkflowError, DICOM_EXTENSION};
use log::debug;

/// The states of the decryption flow. Mirrors the anonymization flow, but
/// the result is metadata only; no container is reconstructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionFlowState {
    Idle,
    FileSelected {
        container: SelectedFile,
    },
    MetadataDisplayed {
        container: SelectedFile,
        metadata: IdentifyingFieldSet,
    },
    Processing {
        container: SelectedFile,
        metadata: IdentifyingFieldSet,
    },
    ResultDisplayed {
        container: SelectedFile,
        metadata: IdentifyingFieldSet,
        recovered: IdentifyingFieldSet,
    },
    Failed {
        message: String,
        container: Option<SelectedFile>,
        metadata: Option<IdentifyingFieldSet>,
    },
}

/// One user's decryption workflow.
///
/// Requires a matching pair of inputs (the encrypted container and the
/// key file issued when it was produced) before the action is enabled.
/// A wrong or corrupt key fails only that request; the displayed
/// (encrypted) metadata is retained.
#[derive(Debug)]
pub struct DecryptionSession<'a, T> {
    transport: &'a T,
    dictionary: &'a TagDictionary,
    state: DecryptionFlowState,
    key_file: Option<SelectedFile>,
    cancel: Option<CancelToken>,
}

impl<'a, T: ProcessingTransport> DecryptionSession<'a, T> {
    pub fn new(transport: &'a T, dictionary: &'a TagDictionary) -> Self {
        Self {
            transport,
            dictionary,
            state: DecryptionFlowState::Idle,
            key_file: None,
            cancel: None,
        }
    }

    pub fn state(&self) -> &DecryptionFlowState {
        &self.state
    }

    pub fn metadata(&self) -> Option<&IdentifyingFieldSet> {
        match &self.state {
            DecryptionFlowState::MetadataDisplayed { metadata, .. }
            | DecryptionFlowState::Processing { metadata, .. }
            | DecryptionFlowState::ResultDisplayed { metadata, .. } => Some(metadata),
            DecryptionFlowState::Failed { metadata, .. } => metadata.as_ref(),
            _ => None,
        }
    }

    pub fn recovered(&self) -> Option<&IdentifyingFieldSet> {
        match &self.state {
            DecryptionFlowState::ResultDisplayed { recovered, .. } => Some(recovered),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            DecryptionFlowState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Both inputs are present and metadata is on display, so the
    /// decryption action is enabled.
    pub fn is_ready(&self) -> bool {
        self.key_file.is_some()
            && matches!(
                self.state,
                DecryptionFlowState::MetadataDisplayed { .. }
                    | DecryptionFlowState::ResultDisplayed { .. }
                    | DecryptionFlowState::Failed {
                        container: Some(_),
                        metadata: Some(_),
                        ..
                    }
            )
    }

    /// Ingest the encrypted container. Same type rule as the
    /// anonymization flow: `.dcm` only, rejected without a state change
    /// otherwise.
    pub fn select_container(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), WorkflowError> {
        if matches!(self.state, DecryptionFlowState::Processing { .. }) {
            return Err(WorkflowError::Validation(
                "A request is already in progress".into(),
            ));
        }

        let container = SelectedFile::new(name, bytes);
        if !container.has_extension(DICOM_EXTENSION) {
            return Err(WorkflowError::Validation(format!(
                "Invalid file type: {name}. Please select a DICOM (.{DICOM_EXTENSION}) file"
            )));
        }

        debug!("container selected: {name}");
        self.state = DecryptionFlowState::FileSelected { container };
        Ok(())
    }

    /// Ingest the key file. Plain-text key files only; rejected without
    /// any other effect otherwise.
    pub fn select_key(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), WorkflowError> {
        let key_file = SelectedFile::new(name, bytes);
        if !key_file.is_key_file() {
            return Err(WorkflowError::Validation(format!(
                "Invalid key file type: {name}. Please select a key (.txt) file"
            )));
        }
        debug!("key file selected: {name}");
        self.key_file = Some(key_file);
        Ok(())
    }

    /// Parse the container and display its (encrypted) identifying
    /// metadata.
    pub fn load_metadata(&mut self) -> Result<IdentifyingFieldSet, WorkflowError> {
        let container = match &self.state {
            DecryptionFlowState::FileSelected { container } => container.clone(),
            _ => {
                return Err(WorkflowError::Validation(
                    "Select a container before loading metadata".into(),
                ))
            }
        };

        match parse_object(&container.bytes) {
            Ok(obj) => {
                let metadata = MetadataExtractor::new(self.dictionary).extract(&obj);
                self.state = DecryptionFlowState::MetadataDisplayed {
                    container,
                    metadata: metadata.clone(),
                };
                Ok(metadata)
            }
            Err(err) => {
                let message = format!("{err}");
                self.state = DecryptionFlowState::Failed {
                    message: message.clone(),
                    container: None,
                    metadata: None,
                };
                Err(WorkflowError::Parse(message))
            }
        }
    }

    /// Explicitly trigger decryption. Requires both inputs; terminates at
    /// a metadata-only result. Key failures are local to this request and
    /// a new attempt (for instance with another key) may start
    /// immediately.
    pub fn start_decryption(&mut self) -> Result<RequestOutcome, WorkflowError> {
        let (container, metadata) = match &self.state {
            DecryptionFlowState::Processing { .. } => return Ok(RequestOutcome::Ignored),
            DecryptionFlowState::MetadataDisplayed {
                container,
                metadata,
            }
            | DecryptionFlowState::ResultDisplayed {
                container,
                metadata,
                ..
            }
            | DecryptionFlowState::Failed {
                container: Some(container),
                metadata: Some(metadata),
                ..
            } => (container.clone(), metadata.clone()),
            _ => {
                return Err(WorkflowError::Validation(
                    "Select a container and load its metadata before decrypting".into(),
                ))
            }
        };
        let key_file = match &self.key_file {
            Some(key_file) => key_file.clone(),
            None => {
                return Err(WorkflowError::Validation(
                    "Select an encryption key file before decrypting".into(),
                ))
            }
        };

        let cancel = CancelToken::new();
        self.cancel = Some(cancel.clone());
        self.state = DecryptionFlowState::Processing {
            container: container.clone(),
            metadata: metadata.clone(),
        };
        debug!("decryption request started");

        let response = self
            .transport
            .decrypt(&container.bytes, &key_file.bytes, &cancel);
        self.cancel = None;

        match response {
            Ok(recovered) => {
                self.state = DecryptionFlowState::ResultDisplayed {
                    container,
                    metadata,
                    recovered,
                };
                Ok(RequestOutcome::Completed)
            }
            Err(TransportError::Cancelled) => {
                debug!("decryption request cancelled, restoring displayed state");
                self.state = DecryptionFlowState::MetadataDisplayed {
                    container,
                    metadata,
                };
                Ok(RequestOutcome::Cancelled)
            }
            Err(err) => {
                self.state = DecryptionFlowState::Failed {
                    message: format!("{err}"),
                    container: Some(container),
                    metadata: Some(metadata),
                };
                Err(err.into())
            }
        }
    }

    /// Abandon the pending request, if any.
    pub fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.revoke();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyMaterial;
    use crate::methods::Method;
    use crate::test_utils::{make_test_object, object_bytes};
    use crate::workflow::LocalTransport;
    use dicom_dictionary_std::tags;

    fn encrypted_pair(transport: &LocalTransport) -> (Vec<u8>, Vec<u8>) {
        let bytes = object_bytes(&make_test_object());
        let encrypted = transport
            .anonymize(&bytes, Method::Encryption, &CancelToken::new())
            .unwrap();
        let key = transport.download_key().unwrap();
        (encrypted, key)
    }

    #[test]
    fn test_decryption_recovers_original_metadata() {
        let transport = LocalTransport::default();
        let dictionary = TagDictionary::default();
        let (encrypted, key) = encrypted_pair(&transport);

        let mut session = DecryptionSession::new(&transport, &dictionary);
        session.select_container("scan.dcm", encrypted).unwrap();
        session.select_key("secret.txt", key).unwrap();
        let displayed = session.load_metadata().unwrap();
        // on display: the encrypted values
        assert_ne!(displayed.value_of(tags::PATIENT_ID), Some("12345"));
        assert!(session.is_ready());

        let outcome = session.start_decryption().unwrap();
        assert_eq!(outcome, RequestOutcome::Completed);
        let recovered = session.recovered().unwrap();
        assert_eq!(recovered.value_of(tags::PATIENT_ID), Some("12345"));
        assert_eq!(recovered.value_of(tags::PATIENT_NAME), Some("Doe^Jane"));
    }

    #[test]
    fn test_action_requires_both_inputs() {
        let transport = LocalTransport::default();
        let dictionary = TagDictionary::default();
        let (encrypted, _key) = encrypted_pair(&transport);

        let mut session = DecryptionSession::new(&transport, &dictionary);
        session.select_container("scan.dcm", encrypted).unwrap();
        session.load_metadata().unwrap();
        assert!(!session.is_ready());

        let result = session.start_decryption();
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
        // still showing the encrypted metadata
        assert!(matches!(
            session.state(),
            DecryptionFlowState::MetadataDisplayed { .. }
        ));
    }

    #[test]
    fn test_key_file_extension_is_validated() {
        let transport = LocalTransport::default();
        let dictionary = TagDictionary::default();
        let mut session = DecryptionSession::new(&transport, &dictionary);
        let result = session.select_key("secret.pem", vec![1, 2, 3]);
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
        assert!(session.key_file.is_none());
    }

    #[test]
    fn test_wrong_key_fails_and_retains_encrypted_metadata() {
        let transport = LocalTransport::default();
        let dictionary = TagDictionary::default();
        let (encrypted, _key) = encrypted_pair(&transport);

        let mut session = DecryptionSession::new(&transport, &dictionary);
        session.select_container("scan.dcm", encrypted).unwrap();
        session
            .select_key("other.txt", KeyMaterial::generate().serialize())
            .unwrap();
        let displayed = session.load_metadata().unwrap();

        let result = session.start_decryption();
        assert!(matches!(result, Err(WorkflowError::Transport(_))));
        assert!(session
            .error_message()
            .unwrap()
            .contains("key does not match"));
        // the encrypted metadata display is unchanged
        assert_eq!(session.metadata(), Some(&displayed));

        // a new attempt with the right key works immediately
        let key = transport.download_key().unwrap();
        session.select_key("secret.txt", key).unwrap();
        assert!(session.is_ready());
        assert_eq!(session.start_decryption().unwrap(), RequestOutcome::Completed);
        assert_eq!(
            session.recovered().unwrap().value_of(tags::PATIENT_ID),
            Some("12345")
        );
    }

    #[test]
    fn test_failed_session_recovers_with_new_container() {
        let transport = LocalTransport::default();
        let dictionary = TagDictionary::default();
        let (encrypted, key) = encrypted_pair(&transport);

        let mut session = DecryptionSession::new(&transport, &dictionary);
        session.select_container("scan.dcm", b"junk".to_vec()).unwrap();
        assert!(session.load_metadata().is_err());

        session.select_container("scan.dcm", encrypted).unwrap();
        session.select_key("secret.txt", key).unwrap();
        session.load_metadata().unwrap();
        assert_eq!(session.start_decryption().unwrap(), RequestOutcome::Completed);
    }
}
