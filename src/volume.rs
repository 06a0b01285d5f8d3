use image::{GrayImage, ImageFormat};
use log::warn;
use nifti::{InMemNiftiObject, NiftiObject, NiftiVolume, RandomAccessNiftiVolume, ReaderOptions};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Threshold fraction used to separate foreground from background when
/// processing a volume, matching the extraction tool this replaces.
pub const MASK_FRACTION_DEFAULT: f32 = 0.4;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Read error: {}", .0.to_lowercase())]
    ReadError(String),

    #[error("Unsupported volume: {}", .0.to_lowercase())]
    Unsupported(String),

    #[error("Render error: {}", .0.to_lowercase())]
    RenderError(String),
}

impl From<nifti::NiftiError> for VolumeError {
    fn from(err: nifti::NiftiError) -> Self {
        VolumeError::ReadError(format!("{err}"))
    }
}

/// A volume's voxel grid with x varying fastest, the NIFTI storage order.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeData {
    dims: [usize; 3],
    voxels: Vec<f32>,
}

impl VolumeData {
    pub fn new(dims: [usize; 3], voxels: Vec<f32>) -> Result<Self, VolumeError> {
        let expected = dims[0] * dims[1] * dims[2];
        if voxels.len() != expected {
            return Err(VolumeError::Unsupported(format!(
                "voxel count {} does not match dimensions {}x{}x{}",
                voxels.len(),
                dims[0],
                dims[1],
                dims[2]
            )));
        }
        Ok(Self { dims, voxels })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    fn voxel(&self, x: usize, y: usize, z: usize) -> f32 {
        self.voxels[x + self.dims[0] * (y + self.dims[1] * z)]
    }

    /// Load a volume from a `.nii` or `.nii.gz` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        Self::from_nifti(obj)
    }

    /// Load a volume from raw file bytes.
    ///
    /// The bytes are staged in a uniquely named temporary file so the
    /// reader can apply its extension-based gzip handling; the file is
    /// removed afterwards.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, VolumeError> {
        let suffix = if bytes.starts_with(&GZIP_MAGIC) {
            "nii.gz"
        } else {
            "nii"
        };
        let path = std::env::temp_dir().join(format!("imanon-{}.{suffix}", Uuid::new_v4()));
        std::fs::write(&path, bytes).map_err(|err| VolumeError::ReadError(format!("{err}")))?;
        let result = Self::from_file(&path);
        let _ = std::fs::remove_file(&path);
        result
    }

    fn from_nifti(obj: InMemNiftiObject) -> Result<Self, VolumeError> {
        let volume = obj.into_volume();
        let dim: Vec<u16> = volume.dim().to_vec();
        if dim.is_empty() {
            return Err(VolumeError::Unsupported("volume has no dimensions".into()));
        }
        if dim.iter().skip(3).any(|&extent| extent > 1) {
            return Err(VolumeError::Unsupported(
                "volumes with more than three non-trivial dimensions".into(),
            ));
        }

        let dims = [
            dim[0] as usize,
            dim.get(1).copied().unwrap_or(1) as usize,
            dim.get(2).copied().unwrap_or(1) as usize,
        ];

        let mut voxels = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        let mut coords = vec![0u16; dim.len()];
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    coords[0] = x as u16;
                    if coords.len() > 1 {
                        coords[1] = y as u16;
                    }
                    if coords.len() > 2 {
                        coords[2] = z as u16;
                    }
                    voxels.push(volume.get_f32(&coords)?);
                }
            }
        }

        VolumeData::new(dims, voxels)
    }
}

/// A rendered 2-D projection, PNG-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterSlice {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// The up-to-three orthogonal mid-plane projections of a volume. A
/// projection whose plane is degenerate is absent, which downstream
/// consumers treat as "not shown" rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceSet {
    pub axial: Option<RasterSlice>,
    pub coronal: Option<RasterSlice>,
    pub sagittal: Option<RasterSlice>,
}

impl SliceSet {
    pub fn is_empty(&self) -> bool {
        self.axial.is_none() && self.coronal.is_none() && self.sagittal.is_none()
    }
}

/// The two parallel slice sets produced by the volume flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeProcessingResult {
    pub original: SliceSet,
    pub processed: SliceSet,
}

/// Renders the mid-plane projection along each axis. Planes with an
/// extent below two pixels are skipped.
pub fn render_slices(volume: &VolumeData) -> Result<SliceSet, VolumeError> {
    Ok(SliceSet {
        axial: render_plane(volume, 0)?,
        coronal: render_plane(volume, 1)?,
        sagittal: render_plane(volume, 2)?,
    })
}

/// Returns a copy of the volume with voxels below the threshold fraction
/// of the intensity range zeroed out, the local stand-in for the external
/// brain-extraction tool.
pub fn mask_background(volume: &VolumeData, fraction: f32) -> VolumeData {
    let (min, max) = intensity_range(&volume.voxels);
    let threshold = min + fraction * (max - min);
    let voxels = volume
        .voxels
        .iter()
        .map(|&v| if v.is_finite() && v >= threshold { v } else { 0.0 })
        .collect();
    VolumeData {
        dims: volume.dims,
        voxels,
    }
}

/// Renders the original and background-masked projections of a volume.
pub fn process(volume: &VolumeData) -> Result<VolumeProcessingResult, VolumeError> {
    let original = render_slices(volume)?;
    let masked = mask_background(volume, MASK_FRACTION_DEFAULT);
    let processed = render_slices(&masked)?;
    Ok(VolumeProcessingResult {
        original,
        processed,
    })
}

fn render_plane(volume: &VolumeData, axis: usize) -> Result<Option<RasterSlice>, VolumeError> {
    let dims = volume.dims;
    let (rows, cols) = match axis {
        0 => (dims[1], dims[2]),
        1 => (dims[0], dims[2]),
        _ => (dims[0], dims[1]),
    };
    if rows < 2 || cols < 2 {
        return Ok(None);
    }

    let mid = dims[axis] / 2;
    let mut values = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let value = match axis {
                0 => volume.voxel(mid, row, col),
                1 => volume.voxel(row, mid, col),
                _ => volume.voxel(row, col, mid),
            };
            values.push(value);
        }
    }

    let (min, max) = intensity_range(&values);
    let range = max - min;
    let pixels: Vec<u8> = values
        .iter()
        .map(|&v| {
            if !v.is_finite() || range <= f32::EPSILON {
                0
            } else {
                (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8
            }
        })
        .collect();

    let image = GrayImage::from_raw(cols as u32, rows as u32, pixels).ok_or_else(|| {
        VolumeError::RenderError(format!("plane buffer does not fit {cols}x{rows}"))
    })?;
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|err| VolumeError::RenderError(format!("{err}")))?;

    Ok(Some(RasterSlice {
        width: cols as u32,
        height: rows as u32,
        png: png.into_inner(),
    }))
}

fn intensity_range(values: &[f32]) -> (f32, f32) {
    let mut finite = values.iter().copied().filter(|v| v.is_finite());
    let first = match finite.next() {
        Some(v) => v,
        None => {
            warn!("volume contains no finite voxel values");
            return (0.0, 0.0);
        }
    };
    finite.fold((first, first), |(min, max), v| (min.min(v), max.max(v)))
}
