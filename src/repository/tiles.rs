use std::path::Path;

use ndarray::{ArrayView3, ArrayViewD, Ix3};
use tracing::{info, warn};

use super::{InsertOutcome, SweepOptions, TileBank};
use crate::db::{Entity, UnitOfWork};
use crate::error::{Result, TileBankError};
use crate::patches::{Patch, PatchGrid};
use crate::raster::{FileFormat, GeoReference, Raster};
use crate::record::{parse_optional_date, DateInput};
use crate::spatial::derive_sub_transform;

/// One stored patch of a sweep, by its top-left pixel offset in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOutcome {
    pub row: usize,
    pub col: usize,
    pub outcome: InsertOutcome,
}

/// `(bands, H, H)` view of `array`, or `InvalidShape`.
pub(crate) fn square_tile_view<'a>(array: ArrayViewD<'a, f32>) -> Result<ArrayView3<'a, f32>> {
    let shape = array.shape().to_vec();
    if shape.len() != 3 {
        return Err(TileBankError::InvalidShape(format!(
            "tile array must have 3 dimensions (bands, height, width), got {:?}",
            shape
        )));
    }
    if shape[1] != shape[2] {
        return Err(TileBankError::InvalidShape(format!(
            "tile array must be square, got {}x{}",
            shape[1], shape[2]
        )));
    }
    array
        .into_dimensionality::<Ix3>()
        .map_err(|e| TileBankError::InvalidShape(e.to_string()))
}

impl TileBank {
    // ========================================================================
    // Single tiles
    // ========================================================================

    /// Store a square `(bands, H, H)` array as a new tile under a fresh name.
    pub fn add_single_tile_from_array(
        &self,
        uow: &mut UnitOfWork<'_>,
        array: ArrayViewD<'_, f32>,
        satellite: &str,
        date: Option<DateInput>,
        georef: &GeoReference,
        format: Option<FileFormat>,
    ) -> Result<InsertOutcome> {
        let data = square_tile_view(array)?;
        let date = parse_optional_date(date)?;
        let satellite_id = uow.db().find_satellite(satellite)?.id;
        let target = self.fresh_path(format.unwrap_or(self.format()));
        self.store_tile(uow, data, satellite_id, date, georef, &target, false)
    }

    /// Copy a georeferenced raster file into the catalog. The stored name is
    /// derived from the canonical source path, so adding the same file twice
    /// hits the unique path.
    pub fn add_single_tile_from_path(
        &self,
        uow: &mut UnitOfWork<'_>,
        path: &Path,
        satellite: &str,
        date: Option<DateInput>,
        exists_ok: bool,
    ) -> Result<InsertOutcome> {
        std::fs::metadata(path)?;
        let date = parse_optional_date(date)?;
        let satellite_id = uow.db().find_satellite(satellite)?.id;
        let target = self.source_path(path, self.format())?;

        if exists_ok {
            if let Some(id) = uow.db().id_for_path(Entity::Tile, &target)? {
                return Ok(InsertOutcome::AlreadyExists(id));
            }
        }

        let raster = self.codec().read(path)?;
        let georef = require_georeference(&raster, path)?;
        self.store_tile(uow, raster.data.view(), satellite_id, date, &georef, &target, exists_ok)
    }

    // ========================================================================
    // Patch sweeps
    // ========================================================================

    /// Cut the raster at `path` into patches and store those `accept` keeps.
    pub fn save_patches_from_raster<F>(
        &self,
        uow: &mut UnitOfWork<'_>,
        path: &Path,
        satellite: &str,
        date: Option<DateInput>,
        options: &SweepOptions,
        accept: F,
    ) -> Result<Vec<PatchOutcome>>
    where
        F: FnMut(&Patch<'_, Ix3>) -> bool,
    {
        let raster = self.codec().read(path)?;
        let georef = require_georeference(&raster, path)?;
        let outcomes =
            self.save_patches_from_array(uow, raster.data.view(), &georef, satellite, date, options, accept)?;
        info!(source = %path.display(), stored = outcomes.len(), "patch sweep finished");
        Ok(outcomes)
    }

    /// Sweep a `(bands, H, W)` array whose pixel (0, 0) sits at
    /// `georef.transform`. Failed patches are logged and skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn save_patches_from_array<F>(
        &self,
        uow: &mut UnitOfWork<'_>,
        array: ArrayView3<'_, f32>,
        georef: &GeoReference,
        satellite: &str,
        date: Option<DateInput>,
        options: &SweepOptions,
        accept: F,
    ) -> Result<Vec<PatchOutcome>>
    where
        F: FnMut(&Patch<'_, Ix3>) -> bool,
    {
        let date = parse_optional_date(date)?;
        let satellite_id = uow.db().find_satellite(satellite)?.id;
        let format = options.format.unwrap_or(self.format());
        let grid = PatchGrid::for_view(&array, options.patch_size, options.stride)?;

        let mut outcomes = Vec::new();
        for patch in grid.patches(array, accept).take(options.limit()) {
            let sub = GeoReference::new(
                derive_sub_transform(&georef.transform, patch.row, patch.col),
                georef.crs.clone(),
            );
            let target = self.fresh_path(format);
            match self.store_tile(uow, patch.data, satellite_id, date.clone(), &sub, &target, true) {
                Ok(outcome) => outcomes.push(PatchOutcome {
                    row: patch.row,
                    col: patch.col,
                    outcome,
                }),
                Err(e) => warn!(row = patch.row, col = patch.col, error = %e, "skipping patch"),
            }
        }
        Ok(outcomes)
    }
}

pub(crate) fn require_georeference(raster: &Raster, path: &Path) -> Result<GeoReference> {
    raster.georeference().ok_or_else(|| {
        TileBankError::InvalidGeometry(format!("{} has no transform or CRS", path.display()))
    })
}
