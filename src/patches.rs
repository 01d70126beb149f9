//! Deterministic square-patch grids over the last two axes of an array.

use ndarray::{ArrayView, Dimension, Slice};

use crate::error::{Result, TileBankError};

/// Row-major grid of `patch_size` x `patch_size` windows stepping by
/// `stride`. Windows that would run past the edge are dropped, never padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGrid {
    height: usize,
    width: usize,
    patch_size: usize,
    stride: usize,
}

/// One window of the grid. `row`/`col` are the pixel offsets of its top-left corner.
#[derive(Debug, Clone)]
pub struct Patch<'a, D: Dimension> {
    pub row: usize,
    pub col: usize,
    pub data: ArrayView<'a, f32, D>,
}

impl PatchGrid {
    pub fn new(height: usize, width: usize, patch_size: usize, stride: Option<usize>) -> Result<Self> {
        if patch_size == 0 {
            return Err(TileBankError::InvalidShape("patch size must be positive".into()));
        }
        let stride = stride.unwrap_or(patch_size);
        if stride == 0 {
            return Err(TileBankError::InvalidShape("stride must be positive".into()));
        }
        Ok(Self {
            height,
            width,
            patch_size,
            stride,
        })
    }

    /// Grid over the last two axes of `view`.
    pub fn for_view<D: Dimension>(view: &ArrayView<'_, f32, D>, patch_size: usize, stride: Option<usize>) -> Result<Self> {
        let shape = view.shape();
        if shape.len() < 2 {
            return Err(TileBankError::InvalidShape(format!(
                "patching needs at least two axes, got shape {:?}",
                shape
            )));
        }
        Self::new(shape[shape.len() - 2], shape[shape.len() - 1], patch_size, stride)
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    fn steps(extent: usize, patch_size: usize, stride: usize) -> usize {
        if extent < patch_size {
            0
        } else {
            (extent - patch_size) / stride + 1
        }
    }

    fn rows(&self) -> usize {
        Self::steps(self.height, self.patch_size, self.stride)
    }

    fn cols(&self) -> usize {
        Self::steps(self.width, self.patch_size, self.stride)
    }

    /// Number of windows in the grid, before any filtering.
    pub fn len(&self) -> usize {
        self.rows() * self.cols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the `index`-th window in row-major order.
    fn offset(&self, index: usize) -> (usize, usize) {
        let cols = self.cols();
        ((index / cols) * self.stride, (index % cols) * self.stride)
    }

    /// Top-left `(row, col)` of every window, row-major.
    pub fn offsets(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.len()).map(move |i| self.offset(i))
    }

    /// The window at (`row`, `col`) of `view`, keeping leading axes whole.
    /// Offsets should come from [`offsets`](Self::offsets).
    pub fn window<'a, D: Dimension>(&self, view: &ArrayView<'a, f32, D>, row: usize, col: usize) -> Patch<'a, D> {
        let size = self.patch_size;
        let ndim = view.ndim();
        let mut data = view.clone();
        data.slice_each_axis_inplace(|ax| {
            let axis = ax.axis.index();
            if axis + 2 == ndim {
                Slice::from(row..row + size)
            } else if axis + 1 == ndim {
                Slice::from(col..col + size)
            } else {
                Slice::from(..)
            }
        });
        Patch { row, col, data }
    }

    /// Lazily slice `view` into windows, skipping those `accept` rejects.
    /// Leading axes are kept whole, so a `(T, bands, H, W)` view yields
    /// `(T, bands, p, p)` patches.
    pub fn patches<'a, D, F>(&self, view: ArrayView<'a, f32, D>, accept: F) -> Patches<'a, D, F>
    where
        D: Dimension,
        F: FnMut(&Patch<'a, D>) -> bool,
    {
        Patches {
            grid: *self,
            view,
            next: 0,
            accept,
        }
    }
}

/// Iterator returned by [`PatchGrid::patches`].
pub struct Patches<'a, D: Dimension, F> {
    grid: PatchGrid,
    view: ArrayView<'a, f32, D>,
    next: usize,
    accept: F,
}

impl<'a, D, F> Iterator for Patches<'a, D, F>
where
    D: Dimension,
    F: FnMut(&Patch<'a, D>) -> bool,
{
    type Item = Patch<'a, D>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.grid.len() {
            let (row, col) = self.grid.offset(self.next);
            self.next += 1;

            let patch = self.grid.window(&self.view, row, col);
            if (self.accept)(&patch) {
                return Some(patch);
            }
        }
        None
    }
}

/// Accepts every patch.
pub fn accept_all<D: Dimension>(_: &Patch<'_, D>) -> bool {
    true
}

/// Accepts patches holding at least one finite, non-zero sample.
pub fn non_empty<D: Dimension>(patch: &Patch<'_, D>) -> bool {
    patch.data.iter().any(|v| v.is_finite() && *v != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3, Array4};

    #[test]
    fn test_grid_coverage_drops_partial_windows() {
        let array = Array3::<f32>::zeros((3, 100, 100));
        let grid = PatchGrid::for_view(&array.view(), 32, None).unwrap();
        assert_eq!(grid.len(), 9);
        assert_eq!(grid.patches(array.view(), accept_all).count(), 9);

        let grid = PatchGrid::for_view(&array.view(), 50, None).unwrap();
        assert_eq!(grid.patches(array.view(), accept_all).count(), 4);
    }

    #[test]
    fn test_offsets_row_major_with_stride() {
        let grid = PatchGrid::new(4, 6, 2, Some(2)).unwrap();
        let offsets: Vec<_> = grid.offsets().collect();
        assert_eq!(offsets, vec![(0, 0), (0, 2), (0, 4), (2, 0), (2, 2), (2, 4)]);

        let overlapping = PatchGrid::new(4, 4, 2, Some(1)).unwrap();
        assert_eq!(overlapping.len(), 9);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(matches!(PatchGrid::new(10, 10, 0, None), Err(TileBankError::InvalidShape(_))));
        assert!(matches!(PatchGrid::new(10, 10, 5, Some(0)), Err(TileBankError::InvalidShape(_))));
    }

    #[test]
    fn test_small_raster_yields_nothing() {
        let grid = PatchGrid::new(10, 50, 32, None).unwrap();
        assert!(grid.is_empty());
    }

    #[test]
    fn test_patch_contents_match_source() {
        let array = Array3::from_shape_fn((2, 6, 6), |(b, r, c)| (b * 100 + r * 10 + c) as f32);
        let patches: Vec<_> = PatchGrid::new(6, 6, 3, None)
            .unwrap()
            .patches(array.view(), accept_all)
            .collect();
        let last = &patches[3];
        assert_eq!((last.row, last.col), (3, 3));
        assert_eq!(last.data, array.slice(s![.., 3..6, 3..6]));
    }

    #[test]
    fn test_predicate_skips_and_iteration_restarts() {
        let mut array = Array3::<f32>::zeros((1, 4, 4));
        array.slice_mut(s![.., 0..2, 2..4]).fill(1.0);
        array[[0, 3, 0]] = f32::NAN;
        let grid = PatchGrid::new(4, 4, 2, None).unwrap();

        let first: Vec<_> = grid.patches(array.view(), non_empty).map(|p| (p.row, p.col)).collect();
        let second: Vec<_> = grid.patches(array.view(), non_empty).map(|p| (p.row, p.col)).collect();
        assert_eq!(first, vec![(0, 2)]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_four_dimensional_keeps_leading_axes() {
        let array = Array4::<f32>::zeros((3, 2, 8, 8));
        let grid = PatchGrid::for_view(&array.view(), 4, None).unwrap();
        let shapes: Vec<_> = grid.patches(array.view(), accept_all).map(|p| p.data.shape().to_vec()).collect();
        assert_eq!(shapes.len(), 4);
        assert!(shapes.iter().all(|s| s == &[3, 2, 4, 4]));
    }
}
