use crate::dictionary::{FieldClass, TagDictionary, ValueType};
use crate::keys::KeyMaterial;
use crate::methods::{Encrypt, FieldTransform, Method, Randomize, Suppress, TransformError};
use dicom_core::header::Header;
use dicom_core::value::CastValueError;
use dicom_object::{AccessError, DefaultDicomObject, FileDicomObject};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Value error: {}", .0.to_lowercase())]
    ValueError(String),

    #[error("Element error: {}", .0.to_lowercase())]
    ElementError(String),

    #[error("Anonymization error: {}", .0.to_lowercase())]
    AnonymizationError(String),
}

impl From<CastValueError> for Error {
    fn from(err: CastValueError) -> Self {
        Error::ValueError(format!("{err}"))
    }
}

impl From<AccessError> for Error {
    fn from(err: AccessError) -> Self {
        Error::ElementError(format!("{err}"))
    }
}

impl From<TransformError> for Error {
    fn from(err: TransformError) -> Self {
        Error::AnonymizationError(format!("{err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The outcome of anonymizing one dataset: the transformed object, and
/// the key material when the method was [`Method::Encryption`].
#[derive(Debug, Clone)]
pub struct AnonymizationResult {
    pub object: DefaultDicomObject,
    pub key: Option<KeyMaterial>,
}

/// Applies one of the anonymization methods to the identifying fields of
/// a dataset, as classified by a [`TagDictionary`].
///
/// The engine is stateless with respect to its inputs: it never mutates
/// the caller's object, and builds a new object carrying the same file
/// meta, the same tag order and untouched pixel data. A dataset with no
/// identifying tags comes back as an unmodified copy (for encryption,
/// together with a freshly generated, unused key).
///
/// # Example
///
/// ```no_run
/// use imaging_anonymization::engine::AnonymizationEngine;
/// use imaging_anonymization::methods::Method;
/// use dicom_object::open_file;
///
/// let obj = open_file("image.dcm").unwrap();
/// let engine = AnonymizationEngine::default();
/// let result = engine.anonymize(&obj, Method::Encryption).unwrap();
/// assert!(result.key.is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AnonymizationEngine {
    dictionary: TagDictionary,
}

impl AnonymizationEngine {
    pub fn new(dictionary: TagDictionary) -> Self {
        Self { dictionary }
    }

    pub fn dictionary(&self) -> &TagDictionary {
        &self.dictionary
    }

    /// Anonymize a dataset with the given method.
    ///
    /// A fresh key is generated per encryption request; keys are never
    /// reused across requests, so the same input encrypts differently on
    /// every call.
    pub fn anonymize(
        &self,
        obj: &DefaultDicomObject,
        method: Method,
    ) -> Result<AnonymizationResult> {
        match method {
            Method::Suppression => {
                let object = self.apply(obj, &Suppress)?;
                Ok(AnonymizationResult { object, key: None })
            }
            Method::Randomization => {
                let object = self.apply(obj, &Randomize::new())?;
                Ok(AnonymizationResult { object, key: None })
            }
            Method::Encryption => {
                let key = KeyMaterial::generate();
                let object = self.apply(obj, &Encrypt::new(&key))?;
                Ok(AnonymizationResult {
                    object,
                    key: Some(key),
                })
            }
        }
    }

    fn apply<T: FieldTransform>(
        &self,
        obj: &DefaultDicomObject,
        transform: &T,
    ) -> Result<DefaultDicomObject> {
        let mut anonymized: DefaultDicomObject =
            FileDicomObject::new_empty_with_meta(obj.meta().clone());

        for elem in obj.iter() {
            let processed = match self.dictionary.classify(&elem.tag()) {
                FieldClass::Identifying => {
                    let value_type = self
                        .dictionary
                        .value_type(&elem.tag())
                        .unwrap_or(ValueType::String);
                    transform.transform(elem, value_type)?
                }
                FieldClass::NonIdentifying => Cow::Borrowed(elem),
            };
            anonymized.put(processed.into_owned());
        }

        Ok(anonymized)
    }
}

impl Default for AnonymizationEngine {
    fn default() -> Self {
        Self::new(TagDictionary::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::DictionaryBuilder;
    use crate::test_utils::{make_file_meta, make_test_object};
    use dicom_core::value::Value;
    use dicom_core::{PrimitiveValue, VR};
    use dicom_dictionary_std::tags;
    use dicom_object::mem::InMemElement;

    #[test]
    fn test_suppression_empties_identifying_tags_only() {
        let engine = AnonymizationEngine::default();
        let obj = make_test_object();
        let result = engine.anonymize(&obj, Method::Suppression).unwrap();

        let name = result.object.element(tags::PATIENT_NAME).unwrap();
        assert_eq!(name.value(), &Value::Primitive(PrimitiveValue::Empty));
        assert_eq!(name.vr(), VR::PN);

        // non-identifying tags and pixel data are byte-identical
        assert_eq!(
            result.object.element(tags::MODALITY).unwrap().value(),
            obj.element(tags::MODALITY).unwrap().value()
        );
        assert_eq!(
            result.object.element(tags::PIXEL_DATA).unwrap().value(),
            obj.element(tags::PIXEL_DATA).unwrap().value()
        );
        assert_eq!(result.key, None);
    }

    #[test]
    fn test_suppression_does_not_mutate_input() {
        let engine = AnonymizationEngine::default();
        let obj = make_test_object();
        let before = obj.element(tags::PATIENT_NAME).unwrap().clone();
        let count_before = obj.iter().count();
        let _ = engine.anonymize(&obj, Method::Suppression).unwrap();
        assert_eq!(obj.element(tags::PATIENT_NAME).unwrap(), &before);
        assert_eq!(obj.iter().count(), count_before);
    }

    #[test]
    fn test_randomization_changes_identifying_values() {
        let engine = AnonymizationEngine::default();
        let obj = make_test_object();
        let result = engine.anonymize(&obj, Method::Randomization).unwrap();

        let name = result.object.element(tags::PATIENT_NAME).unwrap();
        assert_ne!(name.value().to_str().unwrap(), "Doe^Jane");

        let id = result.object.element(tags::PATIENT_ID).unwrap();
        assert_ne!(id.value().to_str().unwrap(), "12345");

        assert_eq!(
            result.object.element(tags::PIXEL_DATA).unwrap().value(),
            obj.element(tags::PIXEL_DATA).unwrap().value()
        );
    }

    #[test]
    fn test_encryption_round_trip() {
        let engine = AnonymizationEngine::default();
        let obj = make_test_object();
        let result = engine.anonymize(&obj, Method::Encryption).unwrap();
        let key = result.key.expect("encryption returns key material");

        let token = result
            .object
            .element(tags::PATIENT_ID)
            .unwrap()
            .value()
            .to_str()
            .unwrap()
            .into_owned();
        assert_ne!(token, "12345");
        assert_eq!(key.decrypt_value(&token).unwrap(), "12345");
    }

    #[test]
    fn test_encryption_keys_differ_across_requests() {
        let engine = AnonymizationEngine::default();
        let obj = make_test_object();
        let first = engine.anonymize(&obj, Method::Encryption).unwrap();
        let second = engine.anonymize(&obj, Method::Encryption).unwrap();
        assert_ne!(first.key, second.key);

        // different keys, therefore different ciphertext for the same input
        let first_token = first
            .object
            .element(tags::PATIENT_ID)
            .unwrap()
            .value()
            .to_str()
            .unwrap()
            .into_owned();
        let second_token = second
            .object
            .element(tags::PATIENT_ID)
            .unwrap()
            .value()
            .to_str()
            .unwrap()
            .into_owned();
        assert_ne!(first_token, second_token);
    }

    #[test]
    fn test_dataset_without_identifying_tags_is_copied() {
        let engine = AnonymizationEngine::default();
        let mut obj: DefaultDicomObject = FileDicomObject::new_empty_with_meta(make_file_meta());
        obj.put(InMemElement::new(tags::MODALITY, VR::CS, Value::from("MR")));

        let result = engine.anonymize(&obj, Method::Suppression).unwrap();
        assert_eq!(
            result.object.element(tags::MODALITY).unwrap().value(),
            obj.element(tags::MODALITY).unwrap().value()
        );

        // encryption still issues a fresh (unused) key
        let result = engine.anonymize(&obj, Method::Encryption).unwrap();
        assert!(result.key.is_some());
    }

    #[test]
    fn test_excluded_tag_is_left_alone() {
        let dictionary = DictionaryBuilder::default()
            .non_identifying(tags::PATIENT_ID)
            .build();
        let engine = AnonymizationEngine::new(dictionary);
        let obj = make_test_object();
        let result = engine.anonymize(&obj, Method::Suppression).unwrap();
        assert_eq!(
            result
                .object
                .element(tags::PATIENT_ID)
                .unwrap()
                .value()
                .to_str()
                .unwrap(),
            "12345"
        );
    }

    #[test]
    fn test_tag_order_is_preserved() {
        let engine = AnonymizationEngine::default();
        let obj = make_test_object();
        let result = engine.anonymize(&obj, Method::Suppression).unwrap();
        let input_tags: Vec<_> = obj.iter().map(|elem| elem.tag()).collect();
        let output_tags: Vec<_> = result.object.iter().map(|elem| elem.tag()).collect();
        assert_eq!(input_tags, output_tags);
    }
}
