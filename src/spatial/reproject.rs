//! Reprojection of points, bounds and rasters between coordinate systems.
//!
//! [`Proj4Reprojector`] is pure Rust: EPSG codes are resolved to PROJ strings
//! through `crs-definitions` and transformed with `proj4rs`.

use ndarray::{Array3, ArrayView3};
use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};

use super::{Affine, Bounds, Crs};
use crate::error::{Result, TileBankError};

/// Pixel interpolation used when resampling a raster onto another grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Required for masks: class values are never blended.
    #[default]
    Nearest,
    Bilinear,
}

impl Resampling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
        }
    }
}

pub trait Reprojector {
    fn reproject_point(&self, x: f64, y: f64, src: &Crs, dst: &Crs) -> Result<(f64, f64)>;

    /// Envelope of the four reprojected corners of `bounds`.
    fn reproject_bounds(&self, bounds: &Bounds, src: &Crs, dst: &Crs) -> Result<Bounds>;

    /// Resample a `(bands, H, W)` raster onto the `dst_shape` = `(H, W)` grid
    /// described by `dst_transform` in `dst_crs`. Destination pixels whose
    /// centre falls outside the source are 0.
    #[allow(clippy::too_many_arguments)]
    fn reproject_array(
        &self,
        array: ArrayView3<'_, f32>,
        src_transform: &Affine,
        src_crs: &Crs,
        dst_transform: &Affine,
        dst_crs: &Crs,
        dst_shape: (usize, usize),
        method: Resampling,
    ) -> Result<Array3<f32>>;
}

/// Express `bounds` (given in `crs_a`) in `crs_b`. Identity when the two are
/// equal.
pub fn reconcile_crs(bounds: &Bounds, crs_a: &Crs, crs_b: &Crs, reprojector: &dyn Reprojector) -> Result<Bounds> {
    if crs_a == crs_b {
        return Ok(*bounds);
    }
    reprojector.reproject_bounds(bounds, crs_a, crs_b)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Proj4Reprojector;

impl Proj4Reprojector {
    pub fn new() -> Self {
        Self
    }
}

/// A parsed projection plus whether it takes lon/lat input, which proj4rs
/// expects in radians.
struct Projection {
    proj: Proj,
    geographic: bool,
}

impl Projection {
    fn from_crs(crs: &Crs) -> Result<Self> {
        let definition = proj_string(crs)?;
        let proj = Proj::from_proj_string(definition)
            .map_err(|e| TileBankError::Projection(format!("invalid projection {}: {:?}", crs, e)))?;
        Ok(Self {
            proj,
            geographic: definition.contains("+proj=longlat"),
        })
    }
}

fn proj_string(crs: &Crs) -> Result<&str> {
    match crs {
        Crs::Epsg(code) => u16::try_from(*code)
            .ok()
            .and_then(crs_definitions::from_code)
            .map(|def| def.proj4)
            .ok_or_else(|| TileBankError::UnsupportedCrs(format!("EPSG:{} has no known definition", code))),
        Crs::Wkt(text) if text.trim_start().starts_with("+proj") => Ok(text.trim()),
        Crs::Wkt(text) => Err(TileBankError::UnsupportedCrs(format!(
            "only PROJ strings can be reprojected, got {:?}",
            text.chars().take(40).collect::<String>()
        ))),
    }
}

/// Whether coordinates in `crs` are longitude/latitude degrees. Unknown
/// definitions count as projected.
pub fn is_geographic(crs: &Crs) -> bool {
    proj_string(crs).map(|s| s.contains("+proj=longlat")).unwrap_or(false)
}

/// Source/destination projection pair, built once per call.
struct PointTransform {
    src: Option<Projection>,
    dst: Option<Projection>,
}

impl PointTransform {
    fn new(src: &Crs, dst: &Crs) -> Result<Self> {
        if src == dst {
            return Ok(Self { src: None, dst: None });
        }
        Ok(Self {
            src: Some(Projection::from_crs(src)?),
            dst: Some(Projection::from_crs(dst)?),
        })
    }

    fn apply(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let (src, dst) = match (&self.src, &self.dst) {
            (Some(src), Some(dst)) => (src, dst),
            _ => return Ok((x, y)),
        };
        let mut point = if src.geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        proj4rs::transform::transform(&src.proj, &dst.proj, &mut point)
            .map_err(|e| TileBankError::Projection(format!("({}, {}): {:?}", x, y, e)))?;
        let out = if dst.geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if !out.0.is_finite() || !out.1.is_finite() {
            return Err(TileBankError::Projection(format!("({}, {}) has no finite image", x, y)));
        }
        Ok(out)
    }
}

impl Reprojector for Proj4Reprojector {
    fn reproject_point(&self, x: f64, y: f64, src: &Crs, dst: &Crs) -> Result<(f64, f64)> {
        PointTransform::new(src, dst)?.apply(x, y)
    }

    fn reproject_bounds(&self, bounds: &Bounds, src: &Crs, dst: &Crs) -> Result<Bounds> {
        let transform = PointTransform::new(src, dst)?;
        let mut corners = Vec::with_capacity(4);
        for (x, y) in bounds.corners() {
            corners.push(transform.apply(x, y)?);
        }
        Ok(Bounds::enclosing(&corners))
    }

    fn reproject_array(
        &self,
        array: ArrayView3<'_, f32>,
        src_transform: &Affine,
        src_crs: &Crs,
        dst_transform: &Affine,
        dst_crs: &Crs,
        dst_shape: (usize, usize),
        method: Resampling,
    ) -> Result<Array3<f32>> {
        // Destination pixels are mapped back into the source grid.
        let to_src = PointTransform::new(dst_crs, src_crs)?;
        let src_inverse = src_transform.inverse()?;
        let (bands, src_h, src_w) = array.dim();
        let (dst_h, dst_w) = dst_shape;
        let mut out = Array3::<f32>::zeros((bands, dst_h, dst_w));

        for row in 0..dst_h {
            for col in 0..dst_w {
                let (x, y) = dst_transform.forward(col as f64 + 0.5, row as f64 + 0.5);
                let (sx, sy) = match to_src.apply(x, y) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let (src_col, src_row) = src_inverse.forward(sx, sy);
                if src_col < 0.0 || src_row < 0.0 || src_col >= src_w as f64 || src_row >= src_h as f64 {
                    continue;
                }
                match method {
                    Resampling::Nearest => {
                        let (c, r) = (src_col.floor() as usize, src_row.floor() as usize);
                        for b in 0..bands {
                            out[[b, row, col]] = array[[b, r, c]];
                        }
                    }
                    Resampling::Bilinear => {
                        for b in 0..bands {
                            out[[b, row, col]] = bilinear(&array, b, src_col - 0.5, src_row - 0.5);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Bilinear sample at fractional pixel-centre coordinates, clamped to the
/// raster edge.
fn bilinear(array: &ArrayView3<'_, f32>, band: usize, col: f64, row: f64) -> f32 {
    let (_, h, w) = array.dim();
    let col = col.clamp(0.0, (w - 1) as f64);
    let row = row.clamp(0.0, (h - 1) as f64);
    let (c0, r0) = (col.floor() as usize, row.floor() as usize);
    let (c1, r1) = ((c0 + 1).min(w - 1), (r0 + 1).min(h - 1));
    let (fx, fy) = (col - c0 as f64, row - r0 as f64);

    let top = array[[band, r0, c0]] as f64 * (1.0 - fx) + array[[band, r0, c1]] as f64 * fx;
    let bottom = array[[band, r1, c0]] as f64 * (1.0 - fx) + array[[band, r1, c1]] as f64 * fx;
    (top * (1.0 - fy) + bottom * fy) as f32
}
