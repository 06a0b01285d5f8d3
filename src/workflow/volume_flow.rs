use crate::volume::VolumeProcessingResult;
use crate::workflow::transport::{CancelToken, ProcessingTransport, TransportError};
use crate::workflow::{RequestOutcome, SelectedFile, WorkflowError};
use log::debug;

/// The states of the volume-processing flow. There is no metadata stage:
/// the result goes straight to the two viewer surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeFlowState {
    Idle,
    FileSelected {
        file: SelectedFile,
    },
    Processing {
        file: SelectedFile,
    },
    ResultDisplayed {
        file: SelectedFile,
        result: VolumeProcessingResult,
    },
    Failed {
        message: String,
        file: Option<SelectedFile>,
    },
}

/// One user's volume-processing workflow: ingest a `.nii`/`.nii.gz`
/// volume and obtain the original and processed slice sets.
#[derive(Debug)]
pub struct VolumeSession<'a, T> {
    transport: &'a T,
    state: VolumeFlowState,
    cancel: Option<CancelToken>,
}

impl<'a, T: ProcessingTransport> VolumeSession<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            state: VolumeFlowState::Idle,
            cancel: None,
        }
    }

    pub fn state(&self) -> &VolumeFlowState {
        &self.state
    }

    pub fn result(&self) -> Option<&VolumeProcessingResult> {
        match &self.state {
            VolumeFlowState::ResultDisplayed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            VolumeFlowState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Ingest a volume file. Accepts the plain and compressed volume
    /// extensions; anything else is rejected without a state change.
    pub fn select_file(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), WorkflowError> {
        if matches!(self.state, VolumeFlowState::Processing { .. }) {
            return Err(WorkflowError::Validation(
                "A request is already in progress".into(),
            ));
        }

        let file = SelectedFile::new(name, bytes);
        if !file.is_volume_file() {
            return Err(WorkflowError::Validation(format!(
                "Invalid file type: {name}. Please select a NIFTI (.nii or .nii.gz) file"
            )));
        }

        debug!("volume file selected: {name}");
        self.state = VolumeFlowState::FileSelected { file };
        Ok(())
    }

    /// Explicitly trigger processing. While a request is in flight
    /// further triggers are dropped; a failed request leaves the session
    /// ready for an immediate new attempt.
    pub fn start_processing(&mut self) -> Result<RequestOutcome, WorkflowError> {
        let file = match &self.state {
            VolumeFlowState::Processing { .. } => return Ok(RequestOutcome::Ignored),
            VolumeFlowState::FileSelected { file }
            | VolumeFlowState::ResultDisplayed { file, .. }
            | VolumeFlowState::Failed {
                file: Some(file), ..
            } => file.clone(),
            _ => {
                return Err(WorkflowError::Validation(
                    "Select a volume file before processing".into(),
                ))
            }
        };

        let cancel = CancelToken::new();
        self.cancel = Some(cancel.clone());
        self.state = VolumeFlowState::Processing { file: file.clone() };
        debug!("volume processing request started");

        let response = self.transport.process_volume(&file.bytes, &cancel);
        self.cancel = None;

        match response {
            Ok(result) => {
                self.state = VolumeFlowState::ResultDisplayed { file, result };
                Ok(RequestOutcome::Completed)
            }
            Err(TransportError::Cancelled) => {
                debug!("volume request cancelled, restoring displayed state");
                self.state = VolumeFlowState::FileSelected { file };
                Ok(RequestOutcome::Cancelled)
            }
            Err(err) => {
                self.state = VolumeFlowState::Failed {
                    message: format!("{err}"),
                    file: Some(file),
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
    use crate::test_utils::nifti_bytes;
    use crate::workflow::LocalTransport;

    #[test]
    fn test_wrong_extension_is_rejected_without_state_change() {
        let transport = LocalTransport::default();
        let mut session = VolumeSession::new(&transport);
        let result = session.select_file("brain.dcm", vec![1, 2, 3]);
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
        assert_eq!(session.state(), &VolumeFlowState::Idle);
    }

    #[test]
    fn test_full_volume_flow() {
        let transport = LocalTransport::default();
        let mut session = VolumeSession::new(&transport);

        session.select_file("brain.nii", nifti_bytes([4, 4, 4])).unwrap();
        assert!(matches!(session.state(), VolumeFlowState::FileSelected { .. }));

        let outcome = session.start_processing().unwrap();
        assert_eq!(outcome, RequestOutcome::Completed);

        let result = session.result().unwrap();
        assert!(result.original.axial.is_some());
        assert!(result.processed.axial.is_some());
    }

    #[test]
    fn test_partial_projections_are_not_an_error() {
        let transport = LocalTransport::default();
        let mut session = VolumeSession::new(&transport);

        session.select_file("thin.nii", nifti_bytes([1, 4, 4])).unwrap();
        session.start_processing().unwrap();

        let result = session.result().unwrap();
        assert!(result.original.axial.is_some());
        assert!(result.original.coronal.is_none());
        assert!(result.original.sagittal.is_none());
    }

    #[test]
    fn test_malformed_volume_fails_and_allows_retry() {
        let transport = LocalTransport::default();
        let mut session = VolumeSession::new(&transport);

        session.select_file("brain.nii", b"junk".to_vec()).unwrap();
        let result = session.start_processing();
        assert!(matches!(result, Err(WorkflowError::Transport(_))));
        assert!(session.error_message().is_some());

        // the retained file allows an immediate new attempt
        let retry = session.start_processing();
        assert!(retry.is_err());

        // re-selecting a valid volume recovers fully
        session.select_file("brain.nii", nifti_bytes([4, 4, 4])).unwrap();
        assert_eq!(session.start_processing().unwrap(), RequestOutcome::Completed);
    }

    #[test]
    fn test_processing_without_file_is_a_validation_error() {
        let transport = LocalTransport::default();
        let mut session = VolumeSession::new(&transport);
        let result = session.start_processing();
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }
}
