use crate::{volume::Volume, wire::WireError};

use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions, error::NiftiError};
use std::{fs, path::Path};
use thiserror::Error;

/// File suffixes the loader understands, longest first.
pub const VOLUMETRIC_SUFFIXES: [&str; 2] = [".nii.gz", ".nii"];

/// Return the recognized volumetric suffix of `filename`, if any.
///
/// Matching is case-insensitive; the returned suffix is always lowercase.
pub fn volumetric_suffix(filename: &str) -> Option<&'static str> {
    let lower = filename.to_ascii_lowercase();
    VOLUMETRIC_SUFFIXES
        .into_iter()
        .find(|suffix| lower.ends_with(suffix) && lower.len() > suffix.len())
}

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] NiftiError),

    #[error("Unsupported dimensionality: expected 3 or 4 axes, found {0}")]
    Dimensionality(usize),

    #[error("Inconsistent volume shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Cannot encode volume: {0}")]
    Pack(#[from] WireError),
}

impl VolumeLoaderError {
    /// Whether the file itself is at fault, as opposed to the storage
    /// holding it.
    pub fn is_bad_input(&self) -> bool {
        !matches!(self, VolumeLoaderError::Io(_))
    }
}

/// Anything that can turn a stored file into a 3D intensity volume.
pub trait VolumeSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<Volume, VolumeLoaderError>;
}

/// Reads `.nii` and `.nii.gz` files.
pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from a NIfTI file
    ///
    /// Scaling from `scl_slope`/`scl_inter` is applied. A 4D file (time
    /// series or multiple channels) is collapsed to its first 3D volume.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the path cannot be read, `Nifti` if the content is
    /// not a valid NIfTI file and `Dimensionality` if the volume is not 3D
    /// or 4D.
    pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<Volume, VolumeLoaderError> {
        let path = path.as_ref();
        fs::metadata(path)?;

        let object = ReaderOptions::new().read_file(path)?;
        let data = object.into_volume().into_ndarray::<f64>()?;

        Self::collapse_to_3d(data).map(Volume::new)
    }

    fn collapse_to_3d(data: ArrayD<f64>) -> Result<Array3<f64>, VolumeLoaderError> {
        match data.ndim() {
            3 => Ok(data.into_dimensionality::<Ix3>()?),
            4 => Ok(data.index_axis_move(Axis(3), 0).into_dimensionality::<Ix3>()?),
            n => Err(VolumeLoaderError::Dimensionality(n)),
        }
    }
}

impl VolumeSource for VolumeLoader {
    fn load(&self, path: &Path) -> Result<Volume, VolumeLoaderError> {
        Self::load_from_file_path(path)
    }
}
