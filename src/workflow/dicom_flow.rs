use crate::dictionary::TagDictionary;
use crate::extract::{IdentifyingFieldSet, MetadataExtractor};
use crate::methods::Method;
use crate::parse_object;
use crate::workflow::transport::{CancelToken, ProcessingTransport, TransportError};
use crate::workflow::{RequestOutcome, SelectedFile, WorkflowError, DICOM_EXTENSION};
use log::debug;

/// The transformed container handed back by the processing service,
/// together with the metadata re-extracted from it for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymizedArtifact {
    pub bytes: Vec<u8>,
    pub metadata: IdentifyingFieldSet,
}

/// The states of the DICOM anonymization flow.
///
/// Each state carries exactly the data valid in it, so combinations like
/// "processing without a selected file" cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DicomFlowState {
    Idle,
    FileSelected {
        file: SelectedFile,
    },
    MetadataDisplayed {
        file: SelectedFile,
        metadata: IdentifyingFieldSet,
    },
    Processing {
        file: SelectedFile,
        metadata: IdentifyingFieldSet,
    },
    ResultDisplayed {
        file: SelectedFile,
        metadata: IdentifyingFieldSet,
        result: AnonymizedArtifact,
    },
    Failed {
        message: String,
        file: Option<SelectedFile>,
        metadata: Option<IdentifyingFieldSet>,
    },
}

/// One user's DICOM anonymization workflow.
///
/// Sequences ingestion, extraction, method selection, transformation and
/// result consumption against a [`ProcessingTransport`]. At most one
/// transformation request is in flight; a second trigger while
/// [`DicomFlowState::Processing`] is a no-op. Failures are terminal for
/// the current request only: the session keeps the previously displayed
/// metadata and stays usable.
#[derive(Debug)]
pub struct DicomSession<'a, T> {
    transport: &'a T,
    dictionary: &'a TagDictionary,
    state: DicomFlowState,
    cancel: Option<CancelToken>,
}

impl<'a, T: ProcessingTransport> DicomSession<'a, T> {
    pub fn new(transport: &'a T, dictionary: &'a TagDictionary) -> Self {
        Self {
            transport,
            dictionary,
            state: DicomFlowState::Idle,
            cancel: None,
        }
    }

    pub fn state(&self) -> &DicomFlowState {
        &self.state
    }

    /// The currently displayed original metadata, also available from the
    /// failed state.
    pub fn metadata(&self) -> Option<&IdentifyingFieldSet> {
        match &self.state {
            DicomFlowState::MetadataDisplayed { metadata, .. }
            | DicomFlowState::Processing { metadata, .. }
            | DicomFlowState::ResultDisplayed { metadata, .. } => Some(metadata),
            DicomFlowState::Failed { metadata, .. } => metadata.as_ref(),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&AnonymizedArtifact> {
        match &self.state {
            DicomFlowState::ResultDisplayed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            DicomFlowState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Ingest a file. Only `.dcm` containers are accepted; anything else
    /// is rejected with a validation message, the state is unchanged and
    /// no request is made.
    pub fn select_file(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), WorkflowError> {
        if matches!(self.state, DicomFlowState::Processing { .. }) {
            return Err(WorkflowError::Validation(
                "A request is already in progress".into(),
            ));
        }

        let file = SelectedFile::new(name, bytes);
        if !file.has_extension(DICOM_EXTENSION) {
            return Err(WorkflowError::Validation(format!(
                "Invalid file type: {name}. Please select a DICOM (.{DICOM_EXTENSION}) file"
            )));
        }

        debug!("file selected: {name}");
        self.state = DicomFlowState::FileSelected { file };
        Ok(())
    }

    /// Parse the selected file and extract its identifying metadata for
    /// display. A malformed container moves the session to the failed
    /// state; selecting a file again recovers.
    pub fn load_metadata(&mut self) -> Result<IdentifyingFieldSet, WorkflowError> {
        let file = match &self.state {
            DicomFlowState::FileSelected { file } => file.clone(),
            _ => {
                return Err(WorkflowError::Validation(
                    "Select a file before loading metadata".into(),
                ))
            }
        };

        match parse_object(&file.bytes) {
            Ok(obj) => {
                let metadata = MetadataExtractor::new(self.dictionary).extract(&obj);
                self.state = DicomFlowState::MetadataDisplayed {
                    file,
                    metadata: metadata.clone(),
                };
                Ok(metadata)
            }
            Err(err) => {
                let message = format!("{err}");
                self.state = DicomFlowState::Failed {
                    message: message.clone(),
                    file: None,
                    metadata: None,
                };
                Err(WorkflowError::Parse(message))
            }
        }
    }

    /// Explicitly trigger the transformation. Requires displayed
    /// metadata; while a request is in flight further triggers are
    /// dropped. On success the result's metadata is re-extracted for the
    /// processed view; on failure the original metadata stays displayed
    /// and a new attempt may be started immediately.
    pub fn start_anonymization(&mut self, method: Method) -> Result<RequestOutcome, WorkflowError> {
        let (file, metadata) = match &self.state {
            DicomFlowState::Processing { .. } => return Ok(RequestOutcome::Ignored),
            DicomFlowState::MetadataDisplayed { file, metadata }
            | DicomFlowState::ResultDisplayed { file, metadata, .. }
            | DicomFlowState::Failed {
                file: Some(file),
                metadata: Some(metadata),
                ..
            } => (file.clone(), metadata.clone()),
            _ => {
                return Err(WorkflowError::Validation(
                    "Load a file and its metadata before anonymizing".into(),
                ))
            }
        };

        let cancel = CancelToken::new();
        self.cancel = Some(cancel.clone());
        self.state = DicomFlowState::Processing {
            file: file.clone(),
            metadata: metadata.clone(),
        };
        debug!("anonymization request started with method {method}");

        let response = self.transport.anonymize(&file.bytes, method, &cancel);
        self.cancel = None;

        match response {
            Ok(bytes) => {
                let processed_metadata = match parse_object(&bytes) {
                    Ok(obj) => MetadataExtractor::new(self.dictionary).extract(&obj),
                    Err(err) => {
                        let message = format!("{err}");
                        self.state = DicomFlowState::Failed {
                            message: message.clone(),
                            file: Some(file),
                            metadata: Some(metadata),
                        };
                        return Err(WorkflowError::Parse(message));
                    }
                };
                self.state = DicomFlowState::ResultDisplayed {
                    file,
                    metadata,
                    result: AnonymizedArtifact {
                        bytes,
                        metadata: processed_metadata,
                    },
                };
                Ok(RequestOutcome::Completed)
            }
            Err(TransportError::Cancelled) => {
                debug!("anonymization request cancelled, restoring displayed state");
                self.state = DicomFlowState::MetadataDisplayed { file, metadata };
                Ok(RequestOutcome::Cancelled)
            }
            Err(err) => {
                self.state = DicomFlowState::Failed {
                    message: format!("{err}"),
                    file: Some(file),
                    metadata: Some(metadata),
                };
                Err(err.into())
            }
        }
    }

    /// Abandon the pending request, if any. No partial result is
    /// committed; the previously displayed state is preserved.
    pub fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.revoke();
        }
    }

    /// The serialized key material of the most recent encryption request,
    /// for download.
    pub fn download_key(&self) -> Result<Vec<u8>, WorkflowError> {
        Ok(self.transport.download_key()?)
    }
}
