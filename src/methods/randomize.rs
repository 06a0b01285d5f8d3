use chrono::{Days, NaiveDate};
use dicom_core::header::Header;
use dicom_core::value::Value;
use dicom_core::{PrimitiveValue, VR};
use dicom_object::mem::InMemElement;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use rand::Rng;
use std::borrow::Cow;

use crate::dictionary::ValueType;
use crate::methods::{is_empty_element, FieldTransform, TransformError};

const UPPER_ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SYNTH_STRING_LENGTH: usize = 8;
const SYNTH_BINARY_LENGTH: usize = 16;
const SEX_CODES: [&str; 3] = ["M", "F", "O"];

// Birth dates are drawn from this window so a synthetic value stays
// plausible for an adult patient.
const DATE_RANGE_START: (i32, u32, u32) = (1930, 1, 1);
const DATE_RANGE_DAYS: u64 = 27_000;

// Regeneration guard against the (unlikely) case of drawing the original
// value again.
const MAX_DRAWS: usize = 8;

/// Randomization: the identifying value is replaced with a freshly
/// generated, type-consistent synthetic value. The output never equals
/// the original, and two invocations on the same input are not expected
/// to match.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Randomize;

impl Randomize {
    pub(crate) fn new() -> Self {
        Self {}
    }
}

impl FieldTransform for Randomize {
    fn transform<'a>(
        &self,
        elem: &'a InMemElement,
        value_type: ValueType,
    ) -> Result<Cow<'a, InMemElement>, TransformError> {
        if is_empty_element(elem) {
            return Ok(Cow::Borrowed(elem));
        }

        let mut rng = rand::thread_rng();

        if value_type == ValueType::Binary {
            let bytes: Vec<u8> = (0..SYNTH_BINARY_LENGTH).map(|_| rng.gen()).collect();
            let new_elem =
                InMemElement::new(elem.tag(), elem.vr(), PrimitiveValue::U8(bytes.into()));
            return Ok(Cow::Owned(new_elem));
        }

        let original = elem.value().to_str()?.into_owned();
        let mut candidate = synth_value(&mut rng, value_type, elem.vr(), &original);
        let mut draws = 1;
        while candidate == original && draws < MAX_DRAWS {
            candidate = synth_value(&mut rng, value_type, elem.vr(), &original);
            draws += 1;
        }
        if candidate == original {
            // tiny value spaces (e.g. sex codes) can exhaust the draws
            candidate = format!("{candidate}X");
        }

        let new_elem = InMemElement::new(elem.tag(), elem.vr(), Value::from(candidate));
        Ok(Cow::Owned(new_elem))
    }
}

fn synth_value<R: Rng>(rng: &mut R, value_type: ValueType, vr: VR, original: &str) -> String {
    match value_type {
        ValueType::Date => synth_date(rng),
        ValueType::Numeric => synth_digits(rng, original.len().clamp(1, 12)),
        ValueType::String | ValueType::Binary => match vr {
            VR::PN => synth_person_name(rng),
            VR::CS => synth_code(rng, original),
            _ => synth_string(rng),
        },
    }
}

fn synth_string<R: Rng>(rng: &mut R) -> String {
    (0..SYNTH_STRING_LENGTH)
        .map(|_| UPPER_ALNUM[rng.gen_range(0..UPPER_ALNUM.len())] as char)
        .collect()
}

fn synth_digits<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}

fn synth_person_name<R: Rng>(rng: &mut R) -> String {
    let first: String = FirstName().fake_with_rng(rng);
    let last: String = LastName().fake_with_rng(rng);
    format!("{last}^{first}")
}

fn synth_code<R: Rng>(rng: &mut R, original: &str) -> String {
    let pool: Vec<&str> = SEX_CODES
        .iter()
        .copied()
        .filter(|code| *code != original)
        .collect();
    if pool.is_empty() {
        synth_string(rng)
    } else {
        pool[rng.gen_range(0..pool.len())].to_string()
    }
}

fn synth_date<R: Rng>(rng: &mut R) -> String {
    let (year, month, day) = DATE_RANGE_START;
    // the range start is a valid calendar date
    let start = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default();
    let date = start + Days::new(rng.gen_range(0..DATE_RANGE_DAYS));
    date.format("%Y%m%d").to_string()
}
