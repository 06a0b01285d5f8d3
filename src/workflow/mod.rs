//! The client-visible workflow: file ingestion, metadata display,
//! transformation requests and result consumption, sequenced by one
//! explicit state machine per flow.

mod decrypt_flow;
mod dicom_flow;
pub mod transport;
mod volume_flow;

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

pub use decrypt_flow::{DecryptionFlowState, DecryptionSession};
pub use dicom_flow::{AnonymizedArtifact, DicomFlowState, DicomSession};
pub use transport::{CancelToken, LocalTransport, ProcessingTransport, TransportError};
pub use volume_flow::{VolumeFlowState, VolumeSession};

/// Container extension accepted by the DICOM and decryption flows.
pub const DICOM_EXTENSION: &str = "dcm";

/// Key file extensions accepted by the decryption flow.
pub const KEY_EXTENSIONS: [&str; 2] = ["txt", "key"];

static VOLUME_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Wrong file type or missing required input. Raised before any
    /// request is made; the session state is unchanged.
    #[error("Validation error: {}", .0.to_lowercase())]
    Validation(String),

    /// The selected file could not be parsed as a container.
    #[error("Parse error: {}", .0.to_lowercase())]
    Parse(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What an explicit transformation trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request ran and the session moved to its result state.
    Completed,

    /// A request was already in flight; the trigger was dropped, not
    /// queued.
    Ignored,

    /// The request was cancelled; the prior displayed state was
    /// preserved.
    Cancelled,
}

/// A file the user handed to a flow: the original name (used for type
/// validation) and the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        let name = self.name.to_ascii_lowercase();
        let suffix = format!(".{extension}");
        name.len() > suffix.len() && name.ends_with(&suffix)
    }

    /// Whether the name looks like a volume file (`.nii`, optionally
    /// gzip-compressed).
    pub fn is_volume_file(&self) -> bool {
        let regex = VOLUME_NAME_REGEX
            .get_or_init(|| Regex::new(r"(?i)^.+\.nii(\.gz)?$").expect("valid regex"));
        regex.is_match(&self.name)
    }

    pub fn is_key_file(&self) -> bool {
        KEY_EXTENSIONS.iter().any(|ext| self.has_extension(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_extension_is_case_insensitive() {
        let file = SelectedFile::new("SCAN.DCM", vec![]);
        assert!(file.has_extension("dcm"));
    }

    #[test]
    fn test_extension_alone_is_not_a_file_name() {
        let file = SelectedFile::new(".dcm", vec![]);
        assert!(!file.has_extension("dcm"));
    }

    #[test]
    fn test_volume_file_names() {
        assert!(SelectedFile::new("brain.nii", vec![]).is_volume_file());
        assert!(SelectedFile::new("brain.nii.gz", vec![]).is_volume_file());
        assert!(SelectedFile::new("BRAIN.NII.GZ", vec![]).is_volume_file());
        assert!(!SelectedFile::new("brain.gz", vec![]).is_volume_file());
        assert!(!SelectedFile::new("brain.dcm", vec![]).is_volume_file());
        assert!(!SelectedFile::new(".nii", vec![]).is_volume_file());
    }

    #[test]
    fn test_key_file_names() {
        assert!(SelectedFile::new("secret.txt", vec![]).is_key_file());
        assert!(SelectedFile::new("secret.key", vec![]).is_key_file());
        assert!(!SelectedFile::new("secret.pem", vec![]).is_key_file());
    }
}
