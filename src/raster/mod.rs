//! Raster file I/O: `.npy` arrays and GeoTIFFs behind one codec trait.

pub mod geotiff;
pub mod npy;

use std::path::Path;

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TileBankError};
use crate::spatial::{compute_bounds, Affine, Bounds, Crs};

/// On-disk encoding of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Npy,
    Tif,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Npy => "npy",
            FileFormat::Tif => "tif",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "npy" => Some(FileFormat::Npy),
            "tif" | "tiff" => Some(FileFormat::Tif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| TileBankError::UnsupportedFormat(path.display().to_string()))
    }
}

impl std::str::FromStr for FileFormat {
    type Err = TileBankError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s).ok_or_else(|| TileBankError::UnsupportedFormat(s.to_string()))
    }
}

/// Where a raster sits: its pixel-to-CRS transform and the CRS itself.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoReference {
    pub transform: Affine,
    pub crs: Crs,
}

impl GeoReference {
    pub fn new(transform: Affine, crs: Crs) -> Self {
        Self { transform, crs }
    }
}

/// A decoded raster as `(bands, H, W)` samples plus optional georeferencing.
#[derive(Debug, Clone)]
pub struct Raster {
    pub data: Array3<f32>,
    pub transform: Option<Affine>,
    pub crs: Option<Crs>,
}

impl Raster {
    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    /// Both transform and CRS, if the file carried them.
    pub fn georeference(&self) -> Option<GeoReference> {
        match (&self.transform, &self.crs) {
            (Some(t), Some(c)) => Some(GeoReference::new(*t, c.clone())),
            _ => None,
        }
    }

    pub fn bounds(&self) -> Option<Result<Bounds>> {
        self.transform.map(|t| compute_bounds(&t, self.width(), self.height()))
    }
}

pub trait RasterCodec {
    fn read(&self, path: &Path) -> Result<Raster>;

    fn write(&self, array: ArrayView3<'_, f32>, path: &Path, georef: Option<&GeoReference>) -> Result<()>;
}

/// Picks the encoding from the file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRasterCodec;

impl RasterCodec for FsRasterCodec {
    fn read(&self, path: &Path) -> Result<Raster> {
        match FileFormat::from_path(path)? {
            FileFormat::Npy => Ok(Raster {
                data: npy::read(path)?,
                transform: None,
                crs: None,
            }),
            FileFormat::Tif => geotiff::read(path),
        }
    }

    fn write(&self, array: ArrayView3<'_, f32>, path: &Path, georef: Option<&GeoReference>) -> Result<()> {
        match FileFormat::from_path(path)? {
            FileFormat::Npy => npy::write(array, path),
            FileFormat::Tif => {
                let georef = georef.ok_or_else(|| {
                    TileBankError::InvalidGeometry(format!("{} needs a transform and CRS", path.display()))
                })?;
                geotiff::write(array, path, &georef.transform, &georef.crs)
            }
        }
    }
}
