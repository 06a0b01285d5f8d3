//! Anonymization of medical imaging files for research and sharing.
//!
//! DICOM datasets are anonymized by suppressing, randomizing or
//! encrypting their identifying metadata while leaving pixel data
//! untouched; encryption is reversible with the per-request key material.
//! NIFTI volumes go through a parallel path that renders original and
//! processed orthogonal projections. The [`workflow`] module sequences
//! both paths behind explicit state machines.
//!
//! # Example
//!
//! ```no_run
//! use imaging_anonymization::{Anonymizer, Method};
//! use std::fs::File;
//!
//! let anonymizer = Anonymizer::default();
//! let input = File::open("scan.dcm").unwrap();
//! let anonymized = anonymizer.anonymize(input, Method::Encryption).unwrap();
//!
//! let output = File::create("anonymized.dcm").unwrap();
//! anonymized.write(output).unwrap();
//! let key = anonymized.key.as_ref().unwrap().serialize();
//! ```

pub mod dictionary;
pub mod engine;
pub mod extract;
pub mod keys;
pub mod methods;
pub mod volume;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_utils;

use std::io::{Read, Write};
use thiserror::Error;

pub use dicom_core::Tag;
pub use dicom_dictionary_std::tags;
pub use dicom_object::DefaultDicomObject;

pub use engine::{AnonymizationEngine, AnonymizationResult};
pub use keys::KeyMaterial;
pub use methods::{InvalidMethodError, Method};

const PREAMBLE_LENGTH: usize = 128;
const DICOM_MAGIC: &[u8; 4] = b"DICM";

#[derive(Error, Debug)]
pub enum AnonymizationError {
    #[error("Read error: {}", .0.to_lowercase())]
    ReadError(String),

    #[error("Write error: {}", .0.to_lowercase())]
    WriteError(String),

    #[error("Processing error: {}", .0.to_lowercase())]
    ProcessingError(String),
}

impl From<engine::Error> for AnonymizationError {
    fn from(err: engine::Error) -> Self {
        AnonymizationError::ProcessingError(format!("{err}"))
    }
}

/// Parse a DICOM container from raw file bytes.
///
/// Accepts both the full file encoding (128-byte preamble followed by the
/// magic code) and a bare stream starting at the magic code.
pub(crate) fn parse_object(data: &[u8]) -> Result<DefaultDicomObject, AnonymizationError> {
    let body = if data.len() > PREAMBLE_LENGTH + DICOM_MAGIC.len()
        && &data[PREAMBLE_LENGTH..PREAMBLE_LENGTH + DICOM_MAGIC.len()] == DICOM_MAGIC
    {
        &data[PREAMBLE_LENGTH..]
    } else {
        data
    };
    DefaultDicomObject::from_reader(body).map_err(|err| {
        AnonymizationError::ReadError(format!("{err}"))
    })
}

/// An anonymized container, ready to be written back out, together with
/// the key material when the request used encryption.
#[derive(Debug, Clone)]
pub struct AnonymizedObject {
    pub anonymized: DefaultDicomObject,
    pub key: Option<KeyMaterial>,
}

impl AnonymizedObject {
    /// Write the full file encoding of the anonymized container.
    pub fn write<W: Write>(&self, to: W) -> Result<(), AnonymizationError> {
        self.anonymized
            .write_all(to)
            .map_err(|err| AnonymizationError::WriteError(format!("{err}")))
    }
}

/// High-level entry point: read a container, anonymize it with a method,
/// hand back the result.
#[derive(Debug, Clone, PartialEq)]
pub struct Anonymizer {
    engine: AnonymizationEngine,
}

impl Anonymizer {
    pub fn new(engine: AnonymizationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &AnonymizationEngine {
        &self.engine
    }

    /// Read a DICOM container from `src` and anonymize it.
    ///
    /// The read completes fully before any extraction or transformation
    /// starts; no partially parsed state is ever observable.
    pub fn anonymize<R: Read>(
        &self,
        mut src: R,
        method: Method,
    ) -> Result<AnonymizedObject, AnonymizationError> {
        let mut data = Vec::new();
        src.read_to_end(&mut data)
            .map_err(|err| AnonymizationError::ReadError(format!("{err}")))?;
        let obj = parse_object(&data)?;

        let result = self.engine.anonymize(&obj, method)?;
        Ok(AnonymizedObject {
            anonymized: result.object,
            key: result.key,
        })
    }
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self::new(AnonymizationEngine::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_test_object, object_bytes};
    use std::io::Cursor;

    #[test]
    fn test_anonymize_from_reader_round_trip() {
        let bytes = object_bytes(&make_test_object());
        let anonymizer = Anonymizer::default();
        let anonymized = anonymizer
            .anonymize(Cursor::new(&bytes), Method::Suppression)
            .unwrap();
        assert!(anonymized.key.is_none());

        let mut out = Vec::new();
        anonymized.write(&mut out).unwrap();
        let reread = parse_object(&out).unwrap();
        assert_eq!(
            reread
                .element(tags::PATIENT_NAME)
                .unwrap()
                .value()
                .to_str()
                .unwrap(),
            ""
        );
    }

    #[test]
    fn test_parse_object_accepts_bare_stream() {
        let bytes = object_bytes(&make_test_object());
        // strip the preamble, keep the magic code
        let bare = &bytes[PREAMBLE_LENGTH..];
        assert!(parse_object(bare).is_ok());
    }

    #[test]
    fn test_garbage_is_a_read_error() {
        let anonymizer = Anonymizer::default();
        let result = anonymizer.anonymize(Cursor::new(b"garbage"), Method::Suppression);
        assert!(matches!(result, Err(AnonymizationError::ReadError(_))));
    }

    #[test]
    fn test_encryption_returns_key() {
        let bytes = object_bytes(&make_test_object());
        let anonymizer = Anonymizer::default();
        let anonymized = anonymizer
            .anonymize(Cursor::new(&bytes), Method::Encryption)
            .unwrap();
        assert!(anonymized.key.is_some());
    }
}
