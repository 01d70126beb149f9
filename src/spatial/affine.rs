//! Affine geotransforms and the pixel/geographic conversions built on them.

use serde::{Deserialize, Serialize};

use super::Bounds;
use crate::error::{Result, TileBankError};

/// A 2D affine transform mapping pixel coordinates (col, row) to
/// coordinates (x, y) in the raster's CRS:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// Coefficients are stored in rasterio order `[a, b, c, d, e, f]`. North-up
/// rasters have `b == d == 0` and a negative `e`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform with the upper-left corner at (`origin_x`, `origin_y`).
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, -pixel_height.abs(), origin_y)
    }

    /// Transform that stretches a `width` x `height` grid over `bounds`.
    pub fn from_bounds(bounds: &Bounds, width: usize, height: usize) -> Self {
        Self::north_up(
            bounds.min_x,
            bounds.max_y,
            bounds.width() / width as f64,
            bounds.height() / height as f64,
        )
    }

    pub fn coefficients(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// Apply the forward transform: (col, row) -> (x, y).
    pub fn forward(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// A transform with zero scale (or collinear axes) maps the pixel grid
    /// onto a line or a point.
    pub fn is_degenerate(&self) -> bool {
        self.determinant() == 0.0 || !self.determinant().is_finite()
    }

    pub fn is_north_up(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Absolute pixel size along x and y.
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.a.hypot(self.d), self.b.hypot(self.e))
    }

    pub fn inverse(&self) -> Result<Affine> {
        if self.is_degenerate() {
            return Err(TileBankError::InvalidGeometry(format!(
                "singular affine transform {:?}",
                self.coefficients()
            )));
        }
        let inv_det = 1.0 / self.determinant();
        Ok(Affine {
            a: self.e * inv_det,
            b: -self.b * inv_det,
            c: (self.b * self.f - self.e * self.c) * inv_det,
            d: -self.d * inv_det,
            e: self.a * inv_det,
            f: (self.d * self.c - self.a * self.f) * inv_det,
        })
    }
}

impl From<[f64; 6]> for Affine {
    fn from(c: [f64; 6]) -> Self {
        Self::new(c[0], c[1], c[2], c[3], c[4], c[5])
    }
}

impl From<Affine> for [f64; 6] {
    fn from(t: Affine) -> Self {
        t.coefficients()
    }
}

/// Geographic envelope of a `width` x `height` pixel grid.
///
/// All four corners are mapped because rotated or south-up transforms do not
/// keep (0, 0) at the top-left of the envelope.
pub fn compute_bounds(transform: &Affine, width: usize, height: usize) -> Result<Bounds> {
    if transform.is_degenerate() {
        return Err(TileBankError::InvalidGeometry(format!(
            "degenerate transform {:?}",
            transform.coefficients()
        )));
    }
    let (w, h) = (width as f64, height as f64);
    let corners = [
        transform.forward(0.0, 0.0),
        transform.forward(w, 0.0),
        transform.forward(0.0, h),
        transform.forward(w, h),
    ];
    Ok(Bounds::enclosing(&corners))
}

/// Transform of the sub-grid whose pixel (0, 0) is pixel
/// (`col_offset`, `row_offset`) of `base`.
pub fn derive_sub_transform(base: &Affine, row_offset: usize, col_offset: usize) -> Affine {
    let (c, f) = base.forward(col_offset as f64, row_offset as f64);
    Affine { c, f, ..*base }
}

/// Pixel window of `base` covering `bounds`, as fractional
/// `(col_off, row_off, width, height)`.
pub fn pixel_window(bounds: &Bounds, base: &Affine) -> Result<(f64, f64, f64, f64)> {
    let inv = base.inverse()?;
    let corners = [
        inv.forward(bounds.min_x, bounds.min_y),
        inv.forward(bounds.max_x, bounds.min_y),
        inv.forward(bounds.min_x, bounds.max_y),
        inv.forward(bounds.max_x, bounds.max_y),
    ];
    let window = Bounds::enclosing(&corners);
    Ok((window.min_x, window.min_y, window.width(), window.height()))
}
