use dicom_core::{DataDictionary, Tag};
use dicom_dictionary_std::{tags, StandardDataDictionary};
use garde::Validate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::io::Read;
use thiserror::Error;

const DICTIONARY_DEFAULT_VERSION: &str = "2024.1";

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("Invalid dictionary: {}", .0.to_lowercase())]
    InvalidDictionary(String),
}

impl From<serde_json::Error> for DictionaryError {
    fn from(err: serde_json::Error) -> Self {
        DictionaryError::InvalidDictionary(format!("{err}"))
    }
}

/// Classification of a DICOM tag with respect to patient identity.
///
/// Classification depends only on the tag, never on the value it carries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// The tag value can identify a patient and must be transformed.
    Identifying,

    /// The tag value is left untouched by every anonymization method.
    NonIdentifying,
}

/// The value shape a tag carries, used to generate type-consistent
/// replacement values.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Numeric,
    Date,
    Binary,
}

/// A single dictionary entry: how a tag is classified and what kind of
/// value it holds. The optional `name` overrides the standard dictionary
/// alias in displayed metadata, which is mainly useful for private tags.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate)]
pub struct TagEntry {
    #[garde(skip)]
    pub class: FieldClass,

    #[garde(skip)]
    pub value_type: ValueType,

    #[garde(inner(ascii, length(min = 1, max = 64)))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TagEntry {
    pub fn new(class: FieldClass, value_type: ValueType) -> Self {
        Self {
            class,
            value_type,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TagEntryMap(BTreeMap<Tag, TagEntry>);

impl TagEntryMap {
    pub(crate) fn new() -> Self {
        TagEntryMap(BTreeMap::new())
    }

    pub(crate) fn insert(&mut self, tag: Tag, entry: TagEntry) -> Option<TagEntry> {
        self.0.insert(tag, entry)
    }

    pub(crate) fn get(&self, tag: &Tag) -> Option<&TagEntry> {
        self.0.get(tag)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Tag, &TagEntry)> {
        self.0.iter()
    }
}

impl Default for TagEntryMap {
    fn default() -> Self {
        Self::new()
    }
}

// Struct to hold the entry and an optional comment
#[derive(Serialize)]
struct TagEntryWithComment<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    #[serde(flatten)]
    entry: &'a TagEntry,
}

// For deserialization, we need an owned version
#[derive(Deserialize)]
struct OwnedTagEntryWithComment {
    #[serde(default)]
    #[allow(dead_code)]
    comment: Option<String>,
    #[serde(flatten)]
    entry: TagEntry,
}

// Function to get the tag alias from the data dictionary
fn get_tag_alias(tag: &Tag) -> Option<&'static str> {
    let data_dict = StandardDataDictionary;
    data_dict.by_tag(*tag).map(|entry| entry.alias)
}

impl Serialize for TagEntryMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;

        for (tag, entry) in &self.0 {
            let alias = get_tag_alias(tag);
            let tag_str = format!("{}", tag);

            let entry_with_comment = TagEntryWithComment {
                comment: alias,
                entry,
            };

            map.serialize_entry(&tag_str, &entry_with_comment)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for TagEntryMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string_map: BTreeMap<String, OwnedTagEntryWithComment> =
            BTreeMap::deserialize(deserializer)?;

        let mut tag_map = BTreeMap::new();

        for (tag_str, entry_with_comment) in string_map {
            let tag: Tag = tag_str.parse().map_err(|_| {
                serde::de::Error::custom(format!(
                    "Tag must be in format '(XXXX,XXXX)' where X is a hex digit, got: {}",
                    tag_str
                ))
            })?;

            // Make sure the tag string starts and ends with parentheses
            if !tag_str.starts_with('(') || !tag_str.ends_with(')') {
                return Err(serde::de::Error::custom(format!(
                    "Tag must be in format '(XXXX,XXXX)', got: {}",
                    tag_str
                )));
            }

            let entry = entry_with_comment.entry;

            entry.validate().map_err(|err| {
                serde::de::Error::custom(format!("Validation error for tag {}: {}", tag_str, err))
            })?;

            tag_map.insert(tag, entry);
        }

        Ok(TagEntryMap(tag_map))
    }
}

/// Wire representation of a [`TagDictionary`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Validate)]
struct DictionaryConfig {
    #[garde(ascii, length(min = 1, max = 32))]
    version: String,

    #[garde(skip)]
    #[serde(default)]
    tags: TagEntryMap,
}

/// An immutable, versioned lookup table mapping DICOM tags to their
/// identity classification and value type.
///
/// The dictionary is assembled once at startup, either from the built-in
/// defaults via [`DictionaryBuilder`] or from a JSON document via
/// [`TagDictionary::from_json_reader`], and never changes afterwards. New
/// tags are added through configuration, not code.
///
/// # Example
///
/// ```
/// use imaging_anonymization::dictionary::{FieldClass, TagDictionary};
/// use imaging_anonymization::tags;
///
/// let dictionary = TagDictionary::default();
/// assert_eq!(dictionary.classify(&tags::PATIENT_NAME), FieldClass::Identifying);
/// assert_eq!(dictionary.classify(&tags::MODALITY), FieldClass::NonIdentifying);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TagDictionary {
    version: String,
    entries: TagEntryMap,
}

impl TagDictionary {
    /// The classification for the given tag.
    ///
    /// Tags without a dictionary entry are non-identifying.
    pub fn classify(&self, tag: &Tag) -> FieldClass {
        match self.entries.get(tag) {
            Some(entry) => entry.class,
            None => FieldClass::NonIdentifying,
        }
    }

    /// The value type for the given tag, if the dictionary knows it.
    pub fn value_type(&self, tag: &Tag) -> Option<ValueType> {
        self.entries.get(tag).map(|entry| entry.value_type)
    }

    /// The display name used for the tag in extracted metadata.
    ///
    /// An explicit `name` in the dictionary entry wins, then the standard
    /// data dictionary alias, then the `(GGGG,EEEE)` notation.
    pub fn display_name(&self, tag: &Tag) -> String {
        if let Some(name) = self.entries.get(tag).and_then(|entry| entry.name.as_deref()) {
            return name.to_string();
        }
        match get_tag_alias(tag) {
            Some(alias) => alias.to_string(),
            None => format!("{}", tag),
        }
    }

    /// All identifying tags, in ascending tag order.
    pub fn identifying_tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.class == FieldClass::Identifying)
            .map(|(tag, _)| *tag)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Load a dictionary from a JSON document.
    ///
    /// The document carries a `version` string and a `tags` map keyed by
    /// `(GGGG,EEEE)` tag notation. Entries are validated before the
    /// dictionary is built; an invalid document is rejected as a whole.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, DictionaryError> {
        let config: DictionaryConfig = serde_json::from_reader(reader)?;
        config
            .validate()
            .map_err(|err| DictionaryError::InvalidDictionary(format!("{err}")))?;
        Ok(TagDictionary {
            version: config.version,
            entries: config.tags,
        })
    }

    /// Serialize the dictionary to pretty-printed JSON, suitable for
    /// dumping, editing and reloading with [`TagDictionary::from_json_reader`].
    pub fn to_json(&self) -> Result<String, DictionaryError> {
        let config = DictionaryConfig {
            version: self.version.clone(),
            tags: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&config)?;
        Ok(json)
    }
}

impl Default for TagDictionary {
    fn default() -> Self {
        DictionaryBuilder::default().build()
    }
}

/// A builder for [`TagDictionary`].
///
/// # Example
///
/// ```
/// use imaging_anonymization::dictionary::{DictionaryBuilder, ValueType};
/// use imaging_anonymization::tags;
/// use dicom_core::Tag;
///
/// let dictionary = DictionaryBuilder::default()
///     .identifying(tags::ACCESSION_NUMBER, ValueType::String)
///     .non_identifying(Tag(0x0008, 0x1030))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryBuilder {
    version: String,
    entries: TagEntryMap,
}

impl DictionaryBuilder {
    pub fn new() -> Self {
        DictionaryBuilder {
            version: DICTIONARY_DEFAULT_VERSION.into(),
            entries: TagEntryMap::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the full entry for a tag, replacing any earlier entry.
    pub fn tag_entry(mut self, tag: Tag, entry: TagEntry) -> Self {
        self.entries.insert(tag, entry);
        self
    }

    /// Marks a tag as identifying with the given value type.
    pub fn identifying(self, tag: Tag, value_type: ValueType) -> Self {
        self.tag_entry(tag, TagEntry::new(FieldClass::Identifying, value_type))
    }

    /// Marks a tag as non-identifying, overriding any earlier entry.
    ///
    /// This is how individual tags are excluded from anonymization.
    pub fn non_identifying(self, tag: Tag) -> Self {
        self.tag_entry(
            tag,
            TagEntry::new(FieldClass::NonIdentifying, ValueType::String),
        )
    }

    pub fn build(self) -> TagDictionary {
        TagDictionary {
            version: self.version,
            entries: self.entries,
        }
    }
}

impl Default for DictionaryBuilder {
    /// Creates a builder pre-populated with the standard identifying set:
    /// patient demographics, institution and the study/series descriptions.
    /// A few frequently displayed non-identifying tags are listed
    /// explicitly so a dumped dictionary documents them.
    fn default() -> Self {
        Self::new()
            .identifying(tags::PATIENT_NAME, ValueType::String)
            .identifying(tags::PATIENT_ID, ValueType::String)
            .identifying(tags::PATIENT_BIRTH_DATE, ValueType::Date)
            .identifying(tags::PATIENT_SEX, ValueType::String)
            .identifying(tags::INSTITUTION_NAME, ValueType::String)
            .identifying(tags::STUDY_DESCRIPTION, ValueType::String)
            .identifying(tags::SERIES_DESCRIPTION, ValueType::String)
            .non_identifying(tags::MODALITY)
            .non_identifying(tags::STUDY_DATE)
    }
}
