use crate::dictionary::TagDictionary;
use dicom_core::Tag;
use dicom_object::DefaultDicomObject;
use log::warn;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// One identifying field as displayed to the user: the tag, its display
/// name and the value found in the dataset, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyingField {
    pub tag: Tag,
    pub name: String,
    pub value: Option<String>,
}

/// The identifying subset of a dataset's metadata, in tag order.
///
/// Serializes to a flat name-to-value JSON mapping (order preserved), the
/// shape consumed by metadata displays and returned by decryption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyingFieldSet {
    fields: Vec<IdentifyingField>,
}

impl IdentifyingFieldSet {
    pub(crate) fn new(fields: Vec<IdentifyingField>) -> Self {
        Self { fields }
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdentifyingField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, tag: Tag) -> Option<&IdentifyingField> {
        self.fields.iter().find(|field| field.tag == tag)
    }

    /// The value for the given tag, if the tag is part of the set and a
    /// value was present in the dataset.
    pub fn value_of(&self, tag: Tag) -> Option<&str> {
        self.get(tag).and_then(|field| field.value.as_deref())
    }

    pub(crate) fn with_value(mut self, tag: Tag, value: Option<String>) -> Self {
        if let Some(field) = self.fields.iter_mut().find(|field| field.tag == tag) {
            field.value = value;
        }
        self
    }
}

impl Serialize for IdentifyingFieldSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(&field.name, &field.value)?;
        }
        map.end()
    }
}

/// Reads the identifying fields of a parsed dataset, as classified by a
/// [`TagDictionary`].
///
/// Extraction never mutates the dataset and is idempotent: extracting
/// twice from the same object yields the same set. Tags the dictionary
/// marks identifying but which are absent from the dataset appear with an
/// empty value rather than producing an error.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataExtractor<'a> {
    dictionary: &'a TagDictionary,
}

impl<'a> MetadataExtractor<'a> {
    pub fn new(dictionary: &'a TagDictionary) -> Self {
        Self { dictionary }
    }

    pub fn extract(&self, obj: &DefaultDicomObject) -> IdentifyingFieldSet {
        let fields = self
            .dictionary
            .identifying_tags()
            .map(|tag| IdentifyingField {
                tag,
                name: self.dictionary.display_name(&tag),
                value: element_string(obj, tag),
            })
            .collect();
        IdentifyingFieldSet::new(fields)
    }
}

fn element_string(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
    let elem = obj.element(tag).ok()?;
    match elem.value().to_str() {
        Ok(value) => Some(value.into_owned()),
        Err(err) => {
            warn!("tag {} has a non-textual value, treating it as absent: {err}", tag);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_test_object;
    use dicom_dictionary_std::tags;

    #[test]
    fn test_extract_known_values() {
        let dictionary = TagDictionary::default();
        let obj = make_test_object();
        let extractor = MetadataExtractor::new(&dictionary);
        let set = extractor.extract(&obj);
        assert_eq!(set.value_of(tags::PATIENT_NAME), Some("Doe^Jane"));
        assert_eq!(set.value_of(tags::PATIENT_ID), Some("12345"));
    }

    #[test]
    fn test_absent_tag_yields_empty_value() {
        let dictionary = TagDictionary::default();
        let obj = make_test_object();
        let extractor = MetadataExtractor::new(&dictionary);
        let set = extractor.extract(&obj);
        // the test object carries no institution name
        let field = set.get(tags::INSTITUTION_NAME).unwrap();
        assert_eq!(field.value, None);
    }

    #[test]
    fn test_extract_is_idempotent() {
        let dictionary = TagDictionary::default();
        let obj = make_test_object();
        let extractor = MetadataExtractor::new(&dictionary);
        let first = extractor.extract(&obj);
        let second = extractor.extract(&obj);
        assert_eq!(first, second);
    }

    #[test]
    fn test_extract_does_not_mutate_input() {
        let dictionary = TagDictionary::default();
        let obj = make_test_object();
        let before = obj.element(tags::PATIENT_NAME).unwrap().clone();
        let count_before = obj.iter().count();
        let extractor = MetadataExtractor::new(&dictionary);
        let _ = extractor.extract(&obj);
        assert_eq!(obj.element(tags::PATIENT_NAME).unwrap(), &before);
        assert_eq!(obj.iter().count(), count_before);
    }

    #[test]
    fn test_fields_in_tag_order() {
        let dictionary = TagDictionary::default();
        let obj = make_test_object();
        let extractor = MetadataExtractor::new(&dictionary);
        let set = extractor.extract(&obj);
        let mut tags: Vec<_> = set.iter().map(|field| field.tag).collect();
        let original = tags.clone();
        tags.sort();
        assert_eq!(tags, original);
    }

    #[test]
    fn test_serializes_to_flat_map() {
        let dictionary = TagDictionary::default();
        let obj = make_test_object();
        let extractor = MetadataExtractor::new(&dictionary);
        let set = extractor.extract(&obj);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["PatientName"], "Doe^Jane");
        assert_eq!(json["InstitutionName"], serde_json::Value::Null);
    }
}
