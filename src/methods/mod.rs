mod encrypt;
mod randomize;
mod suppress;

use crate::dictionary::ValueType;
use crate::keys::KeyError;
use dicom_core::value::{ConvertValueError, Value};
use dicom_core::PrimitiveValue;
use dicom_object::mem::InMemElement;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub(crate) use encrypt::Encrypt;
pub(crate) use randomize::Randomize;
pub(crate) use suppress::Suppress;

/// The anonymization strategy applied to every identifying field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Replace identifying values with empty values, keeping the tags.
    Suppression,

    /// Replace identifying values with fresh, type-consistent synthetic
    /// values.
    Randomization,

    /// Replace identifying values with ciphertext from a per-request key,
    /// making the transformation reversible for key holders.
    Encryption,
}

impl Method {
    pub const ALL: [Method; 3] = [
        Method::Suppression,
        Method::Randomization,
        Method::Encryption,
    ];

    /// The wire name of the method, as accepted by the processing
    /// interface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Suppression => "suppression",
            Method::Randomization => "randomization",
            Method::Encryption => "encryption",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0} is not a supported anonymization method")]
pub struct InvalidMethodError(pub String);

impl FromStr for Method {
    type Err = InvalidMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suppression" => Ok(Method::Suppression),
            "randomization" => Ok(Method::Randomization),
            "encryption" => Ok(Method::Encryption),
            other => Err(InvalidMethodError(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub(crate) enum TransformError {
    #[error("Value error: {}", .0.to_lowercase())]
    ValueError(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

impl From<ConvertValueError> for TransformError {
    fn from(err: ConvertValueError) -> Self {
        TransformError::ValueError(format!("{err}"))
    }
}

/// A transformation applied to one identifying element, producing the
/// element that takes its place in the anonymized dataset.
pub(crate) trait FieldTransform {
    fn transform<'a>(
        &self,
        elem: &'a InMemElement,
        value_type: ValueType,
    ) -> Result<Cow<'a, InMemElement>, TransformError>;
}

pub(crate) fn is_empty_element(elem: &InMemElement) -> bool {
    elem.value() == &Value::Primitive(PrimitiveValue::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::VR;
    use dicom_dictionary_std::tags;

    #[test]
    fn test_method_from_str() {
        assert_eq!("suppression".parse(), Ok(Method::Suppression));
        assert_eq!("randomization".parse(), Ok(Method::Randomization));
        assert_eq!("encryption".parse(), Ok(Method::Encryption));
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let result = "pseudonymization".parse::<Method>();
        assert_eq!(
            result,
            Err(InvalidMethodError("pseudonymization".to_string()))
        );
    }

    #[test]
    fn test_method_round_trips_through_wire_name() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse(), Ok(method));
        }
    }

    #[test]
    fn test_is_empty_element() {
        let elem = InMemElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            Value::Primitive(PrimitiveValue::Empty),
        );
        assert!(is_empty_element(&elem));

        let elem = InMemElement::new(tags::PATIENT_NAME, VR::PN, Value::from("Doe^Jane"));
        assert!(!is_empty_element(&elem));
    }
}
