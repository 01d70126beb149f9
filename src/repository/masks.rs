use std::path::Path;

use ndarray::{ArrayView3, Ix3};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::tiles::require_georeference;
use super::{InsertOutcome, SweepOptions, TileBank};
use crate::db::{Entity, MaskTask, Tile, UnitOfWork};
use crate::error::{Result, TileBankError};
use crate::overlap::OverlapResolver;
use crate::patches::{Patch, PatchGrid};
use crate::raster::{FileFormat, GeoReference, Raster};
use crate::record::{parse_optional_date, DateInput, MaskRecord};
use crate::spatial::{compute_bounds, derive_sub_transform, pixel_window, reconcile_crs, Affine, Resampling};

/// Tile and mask stored for one patch of a paired sweep. `mask` is `None`
/// when the tile was stored but its mask failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskedPatchOutcome {
    pub row: usize,
    pub col: usize,
    pub tile: InsertOutcome,
    pub mask: Option<InsertOutcome>,
}

/// Mask created for one overlapping tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskOutcome {
    pub tile_id: i64,
    pub outcome: InsertOutcome,
}

const TRANSFORM_TOLERANCE: f64 = 1e-9;
/// Smallest overlap, in tile pixels, that still yields a mask.
const WINDOW_EPSILON: f64 = 1e-6;

fn transforms_match(a: &Affine, b: &Affine) -> bool {
    a.coefficients()
        .iter()
        .zip(b.coefficients().iter())
        .all(|(x, y)| (x - y).abs() <= TRANSFORM_TOLERANCE * x.abs().max(1.0))
}

/// Image and mask must cover the same pixels. A mask without georeferencing
/// is taken to share the image's grid.
fn check_co_registered(image: &Raster, mask: &Raster) -> Result<()> {
    if (image.height(), image.width()) != (mask.height(), mask.width()) {
        return Err(TileBankError::MismatchedSources(format!(
            "image is {}x{}, mask is {}x{}",
            image.width(),
            image.height(),
            mask.width(),
            mask.height()
        )));
    }
    if let (Some(a), Some(b)) = (&image.crs, &mask.crs) {
        if a != b {
            return Err(TileBankError::MismatchedSources(format!("image CRS {} differs from mask CRS {}", a, b)));
        }
    }
    if let (Some(a), Some(b)) = (&image.transform, &mask.transform) {
        if !transforms_match(a, b) {
            return Err(TileBankError::MismatchedSources(format!(
                "image transform {:?} differs from mask transform {:?}",
                a.coefficients(),
                b.coefficients()
            )));
        }
    }
    Ok(())
}

impl TileBank {
    // ========================================================================
    // Masks
    // ========================================================================

    /// Store `data` as a mask of tile `tile_id`. The mask must have the
    /// tile's pixel dimensions; it inherits the tile's bounds, transform and CRS.
    #[allow(clippy::too_many_arguments)]
    pub fn add_mask(
        &self,
        uow: &mut UnitOfWork<'_>,
        tile_id: i64,
        data: ArrayView3<'_, f32>,
        task: MaskTask,
        mask_type: &str,
        date: Option<String>,
        timeseries_id: Option<i64>,
        format: Option<FileFormat>,
    ) -> Result<InsertOutcome> {
        let tile: Tile = uow.db().get(tile_id)?;
        let (_, height, width) = data.dim();
        if (width as i64, height as i64) != (tile.width, tile.height) {
            return Err(TileBankError::MismatchedSources(format!(
                "mask is {}x{}, tile {} is {}x{}",
                width, height, tile_id, tile.width, tile.height
            )));
        }
        let crs = uow.db().tile_crs(tile_id)?;
        let georef = GeoReference::new(tile.transform, crs);

        let format = format.unwrap_or(self.format());
        let target = self.storage_path(&format!("mask_{}_{}", tile_id, Uuid::new_v4()), format);
        let record = MaskRecord::from_parent(&target, &tile, task, mask_type, date, timeseries_id);
        self.persist(uow, Entity::Mask, data, Some(&georef), &target, false, |db| db.insert(&record))
    }

    /// The tile's own transform: read from its file when that carries one,
    /// otherwise the cataloged value.
    fn native_transform(&self, tile: &Tile) -> Result<Affine> {
        if FileFormat::from_path(&tile.path)? == FileFormat::Npy {
            return Ok(tile.transform);
        }
        Ok(self.codec().read(&tile.path)?.transform.unwrap_or(tile.transform))
    }

    /// Resample a georeferenced mask onto tile `tile_id`'s grid (nearest
    /// neighbour) and store it. Fails with `InvalidGeometry` when the mask
    /// does not overlap the tile.
    #[allow(clippy::too_many_arguments)]
    pub fn create_mask_for_tile(
        &self,
        uow: &mut UnitOfWork<'_>,
        tile_id: i64,
        mask: &Raster,
        task: MaskTask,
        mask_type: &str,
        date: Option<DateInput>,
        format: Option<FileFormat>,
    ) -> Result<InsertOutcome> {
        let date = parse_optional_date(date)?;
        let mask_georef = mask
            .georeference()
            .ok_or_else(|| TileBankError::InvalidGeometry("mask has no transform or CRS".into()))?;

        let tile: Tile = uow.db().get(tile_id)?;
        let tile_crs = uow.db().tile_crs(tile_id)?;
        let tile_transform = self.native_transform(&tile)?;
        let (height, width) = (tile.height as usize, tile.width as usize);

        let mask_bounds = compute_bounds(&mask_georef.transform, mask.width(), mask.height())?;
        let mask_bounds = reconcile_crs(&mask_bounds, &mask_georef.crs, &tile_crs, self.reprojector())?;
        let tile_bounds = compute_bounds(&tile_transform, width, height)?;
        let no_overlap = || TileBankError::InvalidGeometry(format!("mask does not overlap tile {}", tile_id));
        let shared = mask_bounds.intersection(&tile_bounds).ok_or_else(no_overlap)?;
        // Footprints touching along an edge or corner share no pixel.
        let (col, row, cols, rows) = pixel_window(&shared, &tile_transform)?;
        if cols <= WINDOW_EPSILON || rows <= WINDOW_EPSILON {
            return Err(no_overlap());
        }
        debug!(tile_id, col, row, cols, rows, "mask window on tile grid");

        let resampled = self.reprojector().reproject_array(
            mask.data.view(),
            &mask_georef.transform,
            &mask_georef.crs,
            &tile_transform,
            &tile_crs,
            (height, width),
            Resampling::Nearest,
        )?;
        self.add_mask(uow, tile_id, resampled.view(), task, mask_type, date, None, format)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_mask_for_tile_from_path(
        &self,
        uow: &mut UnitOfWork<'_>,
        tile_id: i64,
        mask_path: &Path,
        task: MaskTask,
        mask_type: &str,
        date: Option<DateInput>,
        format: Option<FileFormat>,
    ) -> Result<InsertOutcome> {
        let mask = self.codec().read(mask_path)?;
        self.create_mask_for_tile(uow, tile_id, &mask, task, mask_type, date, format)
    }

    /// Cut the mask raster at `mask_path` into one mask per cataloged tile it
    /// overlaps. Tiles that fail are logged and skipped.
    pub fn create_masks_for_overlapping_tiles(
        &self,
        uow: &mut UnitOfWork<'_>,
        mask_path: &Path,
        task: MaskTask,
        mask_type: &str,
        format: Option<FileFormat>,
    ) -> Result<Vec<MaskOutcome>> {
        let mask = self.codec().read(mask_path)?;
        let georef = require_georeference(&mask, mask_path)?;
        let bounds = compute_bounds(&georef.transform, mask.width(), mask.height())?;

        let candidates = OverlapResolver::new(self.reprojector(), self.working_crs()).find(uow.db(), &bounds, &georef.crs)?;

        let mut outcomes = Vec::new();
        for tile in &candidates {
            match self.create_mask_for_tile(uow, tile.id, &mask, task, mask_type, None, format) {
                Ok(outcome) => outcomes.push(MaskOutcome {
                    tile_id: tile.id,
                    outcome,
                }),
                Err(e) => warn!(tile_id = tile.id, error = %e, "skipping mask for tile"),
            }
        }
        info!(
            source = %mask_path.display(),
            candidates = candidates.len(),
            stored = outcomes.len(),
            "overlap masks created"
        );
        Ok(outcomes)
    }

    /// Sweep a co-registered image/mask pair, storing each accepted patch as a
    /// tile plus its mask. A patch is kept only if `accept` takes both the
    /// image and the mask window.
    #[allow(clippy::too_many_arguments)]
    pub fn save_patches_with_masks_from_rasters<F>(
        &self,
        uow: &mut UnitOfWork<'_>,
        raster_path: &Path,
        mask_path: &Path,
        satellite: &str,
        date: Option<DateInput>,
        task: MaskTask,
        mask_type: &str,
        options: &SweepOptions,
        mut accept: F,
    ) -> Result<Vec<MaskedPatchOutcome>>
    where
        F: FnMut(&Patch<'_, Ix3>) -> bool,
    {
        let image = self.codec().read(raster_path)?;
        let mask = self.codec().read(mask_path)?;
        let georef = require_georeference(&image, raster_path)?;
        check_co_registered(&image, &mask)?;

        let date = parse_optional_date(date)?;
        let satellite_id = uow.db().find_satellite(satellite)?.id;
        let format = options.format.unwrap_or(self.format());
        let image_view = image.data.view();
        let mask_view = mask.data.view();
        let grid = PatchGrid::for_view(&image_view, options.patch_size, options.stride)?;

        let mut outcomes = Vec::new();
        for (row, col) in grid.offsets() {
            if outcomes.len() >= options.limit() {
                break;
            }
            let image_patch = grid.window(&image_view, row, col);
            let mask_patch = grid.window(&mask_view, row, col);
            if !(accept(&image_patch) && accept(&mask_patch)) {
                continue;
            }

            let sub = GeoReference::new(derive_sub_transform(&georef.transform, row, col), georef.crs.clone());
            let target = self.fresh_path(format);
            let tile = match self.store_tile(uow, image_patch.data, satellite_id, date.clone(), &sub, &target, true) {
                Ok(tile) => tile,
                Err(e) => {
                    warn!(row, col, error = %e, "skipping patch");
                    continue;
                }
            };

            let mask = match self.add_mask(
                uow,
                tile.id(),
                mask_patch.data,
                task,
                mask_type,
                date.clone(),
                None,
                Some(format),
            ) {
                Ok(mask) => Some(mask),
                Err(e) => {
                    warn!(tile_id = tile.id(), row, col, error = %e, "mask failed, keeping tile");
                    None
                }
            };
            outcomes.push(MaskedPatchOutcome { row, col, tile, mask });
        }

        info!(
            source = %raster_path.display(),
            mask = %mask_path.display(),
            stored = outcomes.len(),
            "masked patch sweep finished"
        );
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::db::Mask;
    use crate::patches::{accept_all, non_empty};
    use crate::spatial::{Bounds, Crs};
    use ndarray::{s, Array3};

    fn labels(height: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((1, height, width), |(_, r, c)| ((r / 4) * 10 + c / 4) as f32)
    }

    fn geographic_tile(fx: &Fixture, origin: (f64, f64), size: usize) -> i64 {
        let georef = GeoReference::new(Affine::north_up(origin.0, origin.1, 1.0, 1.0), Crs::WGS84);
        fx.bank
            .transaction(|uow| {
                fx.bank
                    .add_single_tile_from_array(uow, ramp(1, size, size).into_dyn().view(), "Sentinel-2", None, &georef, None)
            })
            .unwrap()
            .id()
    }

    #[test]
    fn test_paired_sweep_stores_tile_and_mask() {
        let fx = Fixture::new();
        let image = fx.write_source("image.tif", &ramp(2, 8, 8), utm_transform(), Crs::Epsg(32633));
        let mask = fx.write_source("mask.tif", &labels(8, 8), utm_transform(), Crs::Epsg(32633));

        let outcomes = fx
            .bank
            .transaction(|uow| {
                fx.bank.save_patches_with_masks_from_rasters(
                    uow,
                    &image,
                    &mask,
                    "Sentinel-2",
                    Some("2024-06-01".into()),
                    MaskTask::FieldDelineation,
                    "parcels",
                    &SweepOptions::new(4),
                    accept_all,
                )
            })
            .unwrap();
        assert_eq!(outcomes.len(), 4);

        let last = outcomes[3];
        let masks = fx.bank.db().masks_for_tile(last.tile.id()).unwrap();
        assert_eq!(masks.len(), 1);
        let mask_row: &Mask = &masks[0];
        assert_eq!(Some(mask_row.id), last.mask.map(|m| m.id()));
        assert_eq!(mask_row.date_origin.as_deref(), Some("2024-06-01"));
        assert_eq!(mask_row.transform, derive_sub_transform(&utm_transform(), 4, 4));
        assert!(mask_row.path.file_name().unwrap().to_string_lossy().starts_with("mask_"));

        let stored = fx.bank.codec().read(&mask_row.path).unwrap();
        assert_eq!(stored.data, labels(8, 8).slice(s![.., 4..8, 4..8]));
    }

    #[test]
    fn test_paired_sweep_needs_both_windows_accepted() {
        let fx = Fixture::new();
        let image = fx.write_source("image.tif", &ramp(1, 8, 8), utm_transform(), Crs::Epsg(32633));
        let mut mask_data = Array3::<f32>::zeros((1, 8, 8));
        mask_data.slice_mut(s![.., 0..4, 0..4]).fill(1.0);
        let mask = fx.write_source("mask.tif", &mask_data, utm_transform(), Crs::Epsg(32633));

        let outcomes = fx
            .bank
            .transaction(|uow| {
                fx.bank.save_patches_with_masks_from_rasters(
                    uow,
                    &image,
                    &mask,
                    "Sentinel-2",
                    None,
                    MaskTask::Ntp,
                    "binary",
                    &SweepOptions::new(4),
                    non_empty,
                )
            })
            .unwrap();
        assert_eq!(outcomes.iter().map(|o| (o.row, o.col)).collect::<Vec<_>>(), vec![(0, 0)]);
    }

    #[test]
    fn test_paired_sweep_rejects_mismatched_sources() {
        let fx = Fixture::new();
        let image = fx.write_source("image.tif", &ramp(1, 8, 8), utm_transform(), Crs::Epsg(32633));
        let small = fx.write_source("small.tif", &labels(4, 4), utm_transform(), Crs::Epsg(32633));
        let other_crs = fx.write_source("other.tif", &labels(8, 8), utm_transform(), Crs::Epsg(32634));

        for mask in [small, other_crs] {
            let err = fx
                .bank
                .transaction(|uow| {
                    fx.bank.save_patches_with_masks_from_rasters(
                        uow,
                        &image,
                        &mask,
                        "Sentinel-2",
                        None,
                        MaskTask::Ntp,
                        "binary",
                        &SweepOptions::new(4),
                        accept_all,
                    )
                })
                .unwrap_err();
            assert!(matches!(err, TileBankError::MismatchedSources(_)), "{:?}", err);
        }
        assert!(fx.stored_files().is_empty());
    }

    #[test]
    fn test_overlap_masks_resampled_into_each_tile() {
        let fx = Fixture::new();
        let left = geographic_tile(&fx, (0.0, 8.0), 8);
        let right = geographic_tile(&fx, (8.0, 8.0), 8);
        let far = geographic_tile(&fx, (100.0, 8.0), 8);

        // Half-degree mask grid covering both left and right tiles.
        let mask_data = Array3::from_shape_fn((1, 16, 32), |(_, _, c)| if c < 16 { 1.0 } else { 2.0 });
        let mask_path = fx.write_source("labels.tif", &mask_data, Affine::north_up(0.0, 8.0, 0.5, 0.5), Crs::WGS84);

        let outcomes = fx
            .bank
            .transaction(|uow| {
                fx.bank
                    .create_masks_for_overlapping_tiles(uow, &mask_path, MaskTask::PermStructures, "buildings", None)
            })
            .unwrap();
        let tiles: Vec<i64> = outcomes.iter().map(|o| o.tile_id).collect();
        assert_eq!(tiles, vec![left, right]);
        assert!(fx.bank.db().masks_for_tile(far).unwrap().is_empty());

        let left_mask = &fx.bank.db().masks_for_tile(left).unwrap()[0];
        let data = fx.bank.codec().read(&left_mask.path).unwrap().data;
        assert_eq!(data.dim(), (1, 8, 8));
        assert!(data.iter().all(|v| *v == 1.0));
        let right_mask = &fx.bank.db().masks_for_tile(right).unwrap()[0];
        let data = fx.bank.codec().read(&right_mask.path).unwrap().data;
        assert!(data.iter().all(|v| *v == 2.0));
    }

    #[test]
    fn test_tile_touching_mask_edge_gets_no_mask() {
        let fx = Fixture::new();
        let covered = geographic_tile(&fx, (0.0, 8.0), 8);
        let touching = geographic_tile(&fx, (8.0, 8.0), 8);

        // Covers x in [0, 8], so it only shares the x = 8 edge with the second tile.
        let mask_data = Array3::<f32>::ones((1, 16, 16));
        let mask_path = fx.write_source("edge.tif", &mask_data, Affine::north_up(0.0, 8.0, 0.5, 0.5), Crs::WGS84);

        let outcomes = fx
            .bank
            .transaction(|uow| fx.bank.create_masks_for_overlapping_tiles(uow, &mask_path, MaskTask::Ntp, "binary", None))
            .unwrap();
        assert_eq!(outcomes.iter().map(|o| o.tile_id).collect::<Vec<_>>(), vec![covered]);
        assert!(fx.bank.db().masks_for_tile(touching).unwrap().is_empty());

        let err = fx
            .bank
            .transaction(|uow| {
                fx.bank
                    .create_mask_for_tile_from_path(uow, touching, &mask_path, MaskTask::Ntp, "binary", None, None)
            })
            .unwrap_err();
        assert!(matches!(err, TileBankError::InvalidGeometry(_)), "{:?}", err);
    }

    #[test]
    fn test_mask_outside_tile_is_invalid_geometry() {
        let fx = Fixture::new();
        let tile = geographic_tile(&fx, (0.0, 8.0), 8);
        let mask = Raster {
            data: Array3::ones((1, 4, 4)),
            transform: Some(Affine::from_bounds(&Bounds::new(50.0, 50.0, 54.0, 54.0), 4, 4)),
            crs: Some(Crs::WGS84),
        };
        let err = fx
            .bank
            .transaction(|uow| fx.bank.create_mask_for_tile(uow, tile, &mask, MaskTask::Ntp, "binary", None, None))
            .unwrap_err();
        assert!(matches!(err, TileBankError::InvalidGeometry(_)));
        assert_eq!(fx.bank.db().count::<Mask>().unwrap(), 0);
    }

    #[test]
    fn test_add_mask_wrong_size_leaves_no_file() {
        let fx = Fixture::new();
        let tile = geographic_tile(&fx, (0.0, 8.0), 8);
        let before = fx.stored_files();
        let err = fx
            .bank
            .transaction(|uow| {
                fx.bank
                    .add_mask(uow, tile, Array3::zeros((1, 4, 4)).view(), MaskTask::Ntp, "binary", None, None, None)
            })
            .unwrap_err();
        assert!(matches!(err, TileBankError::MismatchedSources(_)));
        assert_eq!(fx.stored_files(), before);
    }
}
