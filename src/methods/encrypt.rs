use dicom_core::header::Header;
use dicom_core::value::Value;
use dicom_object::mem::InMemElement;
use std::borrow::Cow;

use crate::dictionary::ValueType;
use crate::keys::KeyMaterial;
use crate::methods::{is_empty_element, FieldTransform, TransformError};

/// Encryption: the identifying value is replaced with a ciphertext token
/// from the request's key. Tokens are stored untruncated so the original
/// value can always be reconstructed exactly by a key holder.
#[derive(Debug)]
pub(crate) struct Encrypt<'a> {
    key: &'a KeyMaterial,
}

impl<'a> Encrypt<'a> {
    pub(crate) fn new(key: &'a KeyMaterial) -> Self {
        Self { key }
    }
}

impl FieldTransform for Encrypt<'_> {
    fn transform<'a>(
        &self,
        elem: &'a InMemElement,
        _value_type: ValueType,
    ) -> Result<Cow<'a, InMemElement>, TransformError> {
        if is_empty_element(elem) {
            return Ok(Cow::Borrowed(elem));
        }

        let plaintext = elem.value().to_str()?;
        let token = self.key.encrypt_value(&plaintext)?;

        let new_elem = InMemElement::new(elem.tag(), elem.vr(), Value::from(token));
        Ok(Cow::Owned(new_elem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{PrimitiveValue, VR};
    use dicom_dictionary_std::tags;

    #[test]
    fn test_value_becomes_ciphertext_and_round_trips() {
        let key = KeyMaterial::generate();
        let elem = InMemElement::new(tags::PATIENT_ID, VR::LO, Value::from("12345"));
        let processed = Encrypt::new(&key)
            .transform(&elem, ValueType::String)
            .unwrap();
        let token = processed.value().to_str().unwrap();
        assert_ne!(token, "12345");
        assert_eq!(key.decrypt_value(&token).unwrap(), "12345");
    }

    #[test]
    fn test_tag_and_vr_are_retained() {
        let key = KeyMaterial::generate();
        let elem = InMemElement::new(tags::PATIENT_NAME, VR::PN, Value::from("Doe^Jane"));
        let processed = Encrypt::new(&key)
            .transform(&elem, ValueType::String)
            .unwrap();
        assert_eq!(processed.tag(), tags::PATIENT_NAME);
        assert_eq!(processed.vr(), VR::PN);
    }

    #[test]
    fn test_empty_value_stays_empty() {
        let key = KeyMaterial::generate();
        let elem = InMemElement::new(
            tags::PATIENT_SEX,
            VR::CS,
            Value::Primitive(PrimitiveValue::Empty),
        );
        let processed = Encrypt::new(&key)
            .transform(&elem, ValueType::String)
            .unwrap();
        assert!(is_empty_element(&processed));
    }
}
