use dicom_core::header::Header;
use dicom_core::value::Value;
use dicom_core::PrimitiveValue;
use dicom_object::mem::InMemElement;
use std::borrow::Cow;

use crate::dictionary::ValueType;
use crate::methods::{FieldTransform, TransformError};

/// Suppression: the identifying value is replaced with an empty value in
/// place. The tag and its VR are retained so the container stays
/// structurally valid.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Suppress;

impl FieldTransform for Suppress {
    fn transform<'a>(
        &self,
        elem: &'a InMemElement,
        _value_type: ValueType,
    ) -> Result<Cow<'a, InMemElement>, TransformError> {
        let new_elem = InMemElement::new(
            elem.tag(),
            elem.vr(),
            Value::Primitive(PrimitiveValue::Empty),
        );
        Ok(Cow::Owned(new_elem))
    }
}
