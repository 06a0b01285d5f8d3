use dicom_core::value::Value;
use dicom_core::{PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::meta::{FileMetaTable, FileMetaTableBuilder};
use dicom_object::mem::InMemElement;
use dicom_object::{DefaultDicomObject, FileDicomObject};

pub(crate) fn make_file_meta() -> FileMetaTable {
    FileMetaTableBuilder::new()
        .media_storage_sop_class_uid("1.2.3")
        .media_storage_sop_instance_uid("2.3.4")
        .transfer_syntax("1.2.840.10008.1.2.1") // Explicit VR Little Endian
        .build()
        .unwrap()
}

/// A small dataset with the standard identifying fields, a couple of
/// non-identifying tags and pixel data.
pub(crate) fn make_test_object() -> DefaultDicomObject {
    let mut obj: DefaultDicomObject = FileDicomObject::new_empty_with_meta(make_file_meta());
    obj.put(InMemElement::new(
        tags::MODALITY,
        VR::CS,
        Value::from("MR"),
    ));
    obj.put(InMemElement::new(
        tags::STUDY_DESCRIPTION,
        VR::LO,
        Value::from("Head MRI"),
    ));
    obj.put(InMemElement::new(
        tags::SERIES_DESCRIPTION,
        VR::LO,
        Value::from("T1 axial"),
    ));
    obj.put(InMemElement::new(
        tags::PATIENT_NAME,
        VR::PN,
        Value::from("Doe^Jane"),
    ));
    obj.put(InMemElement::new(
        tags::PATIENT_ID,
        VR::LO,
        Value::from("12345"),
    ));
    obj.put(InMemElement::new(
        tags::PATIENT_BIRTH_DATE,
        VR::DA,
        Value::from("19870402"),
    ));
    obj.put(InMemElement::new(
        tags::PATIENT_SEX,
        VR::CS,
        Value::from("F"),
    ));
    obj.put(InMemElement::new(
        tags::PIXEL_DATA,
        VR::OB,
        Value::Primitive(PrimitiveValue::U8(
            vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15].into(),
        )),
    ));
    obj
}

/// The full file encoding (preamble, magic, meta, dataset) of an object.
pub(crate) fn object_bytes(obj: &DefaultDicomObject) -> Vec<u8> {
    let mut bytes = Vec::new();
    obj.write_all(&mut bytes).unwrap();
    bytes
}

/// A minimal single-file NIFTI-1 volume (uint8 voxels, ramp values).
pub(crate) fn nifti_bytes(dims: [u16; 3]) -> Vec<u8> {
    let count = dims.iter().map(|&d| d as usize).product::<usize>();
    let mut bytes = vec![0u8; 352];

    bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
    let dim: [i16; 8] = [
        3,
        dims[0] as i16,
        dims[1] as i16,
        dims[2] as i16,
        1,
        1,
        1,
        1,
    ];
    for (i, d) in dim.iter().enumerate() {
        bytes[40 + 2 * i..42 + 2 * i].copy_from_slice(&d.to_le_bytes());
    }
    bytes[70..72].copy_from_slice(&2i16.to_le_bytes()); // datatype: uint8
    bytes[72..74].copy_from_slice(&8i16.to_le_bytes()); // bitpix
    for i in 0..8 {
        bytes[76 + 4 * i..80 + 4 * i].copy_from_slice(&1.0f32.to_le_bytes()); // pixdim
    }
    bytes[108..112].copy_from_slice(&352.0f32.to_le_bytes()); // vox_offset
    bytes[112..116].copy_from_slice(&1.0f32.to_le_bytes()); // scl_slope
    bytes[344..348].copy_from_slice(b"n+1\0");
    // bytes 348..352 stay zero: no header extensions

    bytes.extend((0..count).map(|i| (i % 256) as u8));
    bytes
}
