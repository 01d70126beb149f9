//! Spatial bookkeeping: bounding boxes, affine transforms, CRS handling and
//! reprojection.

pub mod affine;
pub mod crs;
pub mod reproject;

use serde::{Deserialize, Serialize};

pub use affine::{compute_bounds, derive_sub_transform, pixel_window, Affine};
pub use crs::Crs;
pub use reproject::{reconcile_crs, Proj4Reprojector, Reprojector, Resampling};

/// Axis-aligned rectangle `(min_x, min_y, max_x, max_y)` in some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest rectangle containing every point.
    pub fn enclosing(points: &[(f64, f64)]) -> Self {
        let mut bounds = Self::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &(x, y) in points {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        bounds
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.min_x, self.max_y),
            (self.max_x, self.max_y),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite() && self.min_y.is_finite() && self.max_x.is_finite() && self.max_y.is_finite()
    }

    /// Closed-interval test: rectangles that only share an edge or a corner
    /// still intersect.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.max_x >= other.min_x
            && self.min_x <= other.max_x
            && self.max_y >= other.min_y
            && self.min_y <= other.max_y
    }

    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        if !self.intersects(other) {
            return None;
        }
        Some(Bounds::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_edges_intersect() {
        let tile = Bounds::new(0.0, 0.0, 10.0, 10.0);
        assert!(tile.intersects(&Bounds::new(10.0, 10.0, 20.0, 20.0)));
        assert!(!tile.intersects(&Bounds::new(10.0001, 10.0001, 20.0, 20.0)));
    }

    #[test]
    fn test_intersection() {
        let a = Bounds::new(0.0, 0.0, 10.0, 10.0);
        let b = Bounds::new(5.0, -5.0, 15.0, 5.0);
        assert_eq!(a.intersection(&b), Some(Bounds::new(5.0, 0.0, 10.0, 5.0)));
        assert_eq!(a.intersection(&Bounds::new(11.0, 11.0, 12.0, 12.0)), None);
    }

    #[test]
    fn test_enclosing() {
        let b = Bounds::enclosing(&[(3.0, -1.0), (-2.0, 4.0), (0.0, 0.0)]);
        assert_eq!(b, Bounds::new(-2.0, -1.0, 3.0, 4.0));
        assert_eq!(b.width(), 5.0);
        assert_eq!(b.height(), 5.0);
        assert!(!Bounds::enclosing(&[]).is_finite());
    }
}
