use std::path::Path;

use ndarray::{ArrayView4, ArrayViewD, Axis, Ix4};
use tracing::{debug, info, warn};

use super::{InsertOutcome, SweepOptions, TileBank};
use crate::db::{NewMultimodal, NewTimeseries, NewTimeseriesLink, Tile, UnitOfWork};
use crate::error::{Result, TileBankError};
use crate::patches::{Patch, PatchGrid};
use crate::raster::GeoReference;
use crate::record::{parse_date_origin, DateInput};
use crate::spatial::derive_sub_transform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeseriesOutcome {
    pub timeseries_id: i64,
    /// Member tiles in ascending date order.
    pub tiles: Vec<InsertOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultimodalOutcome {
    pub multimodal_id: i64,
    pub tile: InsertOutcome,
    pub timeseries: TimeseriesOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeseriesPatchOutcome {
    pub row: usize,
    pub col: usize,
    pub timeseries: TimeseriesOutcome,
}

/// Canonical dates for `count` members, paired with their input index and
/// sorted ascending. The sort is stable, so equal dates keep input order.
fn ordered_members(count: usize, dates: Vec<DateInput>) -> Result<Vec<(usize, String)>> {
    if count != dates.len() {
        return Err(TileBankError::InvalidInput(format!(
            "got {} timeseries members but {} dates",
            count,
            dates.len()
        )));
    }
    if count == 0 {
        return Err(TileBankError::InvalidInput("a timeseries needs at least one member".into()));
    }
    let mut members = dates
        .into_iter()
        .map(parse_date_origin)
        .enumerate()
        .map(|(i, date)| date.map(|d| (i, d)))
        .collect::<Result<Vec<_>>>()?;
    members.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(members)
}

impl TileBank {
    // ========================================================================
    // Timeseries
    // ========================================================================

    /// Add every member with `add(uow, index, date)`, then the timeseries row
    /// and its links, all in one atomic level. Start, end and link order come
    /// from the dates stored on the member tiles, which differ from the
    /// supplied ones when a member was already cataloged.
    fn build_timeseries<F>(
        &self,
        uow: &mut UnitOfWork<'_>,
        members: &[(usize, String)],
        mut add: F,
    ) -> Result<TimeseriesOutcome>
    where
        F: FnMut(&mut UnitOfWork<'_>, usize, &str) -> Result<InsertOutcome>,
    {
        if members.is_empty() {
            return Err(TileBankError::InvalidInput("a timeseries needs at least one member".into()));
        }

        uow.atomic(|uow| {
            let mut stored = Vec::with_capacity(members.len());
            for (index, date) in members {
                let outcome = add(uow, *index, date)?;
                let tile: Tile = uow.db().get(outcome.id())?;
                let stored_date = tile.date_origin.ok_or_else(|| {
                    TileBankError::InvalidInput(format!("timeseries member tile {} has no date", tile.id))
                })?;
                if !outcome.is_created() && stored_date != *date {
                    debug!(tile = tile.id, supplied = %date, stored = %stored_date, "member keeps its cataloged date");
                }
                stored.push((stored_date, outcome));
            }
            stored.sort_by(|a, b| a.0.cmp(&b.0));

            let (start_date, end_date) = match (stored.first(), stored.last()) {
                (Some(first), Some(last)) => (first.0.clone(), last.0.clone()),
                _ => return Err(TileBankError::InvalidInput("a timeseries needs at least one member".into())),
            };
            let timeseries_id = uow.db().insert(&NewTimeseries { start_date, end_date })?;
            for (position, (_, tile)) in stored.iter().enumerate() {
                uow.db().insert(&NewTimeseriesLink {
                    timeseries_id,
                    tile_id: tile.id(),
                    position: position as i64,
                })?;
            }
            let tiles = stored.into_iter().map(|(_, tile)| tile).collect();
            Ok(TimeseriesOutcome { timeseries_id, tiles })
        })
    }

    /// Catalog each file as a tile and group them into one timeseries.
    pub fn add_timeseries_from_paths<P: AsRef<Path>>(
        &self,
        uow: &mut UnitOfWork<'_>,
        paths: &[P],
        satellite: &str,
        dates: Vec<DateInput>,
    ) -> Result<TimeseriesOutcome> {
        let members = ordered_members(paths.len(), dates)?;
        self.build_timeseries(uow, &members, |uow, index, date| {
            self.add_single_tile_from_path(uow, paths[index].as_ref(), satellite, Some(date.into()), true)
        })
    }

    /// Store each step of a `(T, bands, H, W)` stack as a tile sharing
    /// `georef` and group them into one timeseries.
    pub fn add_timeseries_from_array(
        &self,
        uow: &mut UnitOfWork<'_>,
        stack: ArrayView4<'_, f32>,
        georef: &GeoReference,
        satellite: &str,
        dates: Vec<DateInput>,
    ) -> Result<TimeseriesOutcome> {
        let members = ordered_members(stack.len_of(Axis(0)), dates)?;
        let (_, _, height, width) = stack.dim();
        if height != width {
            return Err(TileBankError::InvalidShape(format!(
                "tile array must be square, got {}x{}",
                height, width
            )));
        }
        let satellite_id = uow.db().find_satellite(satellite)?.id;
        self.build_timeseries(uow, &members, |uow, index, date| {
            let data = stack.index_axis(Axis(0), index);
            let target = self.fresh_path(self.format());
            self.store_tile(uow, data, satellite_id, Some(date.to_string()), georef, &target, true)
        })
    }

    /// Cut a `(T, bands, H, W)` stack into patches; every accepted cell
    /// becomes a timeseries of `T` tiles. Failed cells are logged and skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn save_timeseries_patches_from_array<F>(
        &self,
        uow: &mut UnitOfWork<'_>,
        array: ArrayView4<'_, f32>,
        georef: &GeoReference,
        satellite: &str,
        dates: Vec<DateInput>,
        options: &SweepOptions,
        accept: F,
    ) -> Result<Vec<TimeseriesPatchOutcome>>
    where
        F: FnMut(&Patch<'_, Ix4>) -> bool,
    {
        let members = ordered_members(array.len_of(Axis(0)), dates)?;
        let satellite_id = uow.db().find_satellite(satellite)?.id;
        let format = options.format.unwrap_or(self.format());
        let grid = PatchGrid::for_view(&array, options.patch_size, options.stride)?;

        let mut outcomes = Vec::new();
        for patch in grid.patches(array, accept).take(options.limit()) {
            let sub = GeoReference::new(
                derive_sub_transform(&georef.transform, patch.row, patch.col),
                georef.crs.clone(),
            );
            let result = self.build_timeseries(uow, &members, |uow, index, date| {
                let target = self.fresh_path(format);
                let data = patch.data.index_axis(Axis(0), index);
                self.store_tile(uow, data, satellite_id, Some(date.to_string()), &sub, &target, true)
            });
            match result {
                Ok(timeseries) => outcomes.push(TimeseriesPatchOutcome {
                    row: patch.row,
                    col: patch.col,
                    timeseries,
                }),
                Err(e) => warn!(row = patch.row, col = patch.col, error = %e, "skipping timeseries patch"),
            }
        }
        info!(stored = outcomes.len(), steps = members.len(), "timeseries patch sweep finished");
        Ok(outcomes)
    }

    // ========================================================================
    // Multimodal
    // ========================================================================

    /// Pair a high-resolution tile with a new timeseries. Either all three
    /// records (and their files) are stored or none is.
    #[allow(clippy::too_many_arguments)]
    pub fn add_multimodal_from_paths<P: AsRef<Path>>(
        &self,
        uow: &mut UnitOfWork<'_>,
        high_res_path: &Path,
        high_res_satellite: &str,
        high_res_date: Option<DateInput>,
        series_paths: &[P],
        series_satellite: &str,
        series_dates: Vec<DateInput>,
    ) -> Result<MultimodalOutcome> {
        uow.atomic(|uow| {
            let tile = self.add_single_tile_from_path(uow, high_res_path, high_res_satellite, high_res_date, true)?;
            let timeseries = self.add_timeseries_from_paths(uow, series_paths, series_satellite, series_dates)?;
            self.link_multimodal(uow, tile, timeseries)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_multimodal_from_arrays(
        &self,
        uow: &mut UnitOfWork<'_>,
        high_res: ArrayViewD<'_, f32>,
        high_res_georef: &GeoReference,
        high_res_satellite: &str,
        high_res_date: Option<DateInput>,
        series: ArrayView4<'_, f32>,
        series_georef: &GeoReference,
        series_satellite: &str,
        series_dates: Vec<DateInput>,
    ) -> Result<MultimodalOutcome> {
        uow.atomic(|uow| {
            let tile = self.add_single_tile_from_array(
                uow,
                high_res,
                high_res_satellite,
                high_res_date,
                high_res_georef,
                None,
            )?;
            let timeseries =
                self.add_timeseries_from_array(uow, series, series_georef, series_satellite, series_dates)?;
            self.link_multimodal(uow, tile, timeseries)
        })
    }

    fn link_multimodal(
        &self,
        uow: &mut UnitOfWork<'_>,
        tile: InsertOutcome,
        timeseries: TimeseriesOutcome,
    ) -> Result<MultimodalOutcome> {
        let multimodal_id = uow.db().insert(&NewMultimodal {
            tile_id: tile.id(),
            timeseries_id: timeseries.timeseries_id,
        })?;
        Ok(MultimodalOutcome {
            multimodal_id,
            tile,
            timeseries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::db::{Multimodal, Timeseries};
    use crate::patches::{accept_all, non_empty};
    use crate::spatial::{Affine, Crs};
    use ndarray::{s, Array4};

    fn georef() -> GeoReference {
        GeoReference::new(Affine::north_up(10.0, 50.0, 0.001, 0.001), Crs::WGS84)
    }

    fn dates(values: &[&str]) -> Vec<DateInput> {
        values.iter().map(|d| DateInput::from(*d)).collect()
    }

    #[test]
    fn test_members_sorted_by_date() {
        let fx = Fixture::new();
        let sources: Vec<_> = (0..3)
            .map(|i| {
                let data = ramp(1, 4, 4) + i as f32;
                fx.write_source(&format!("scene{}.tif", i), &data, utm_transform(), Crs::Epsg(32633))
            })
            .collect();

        let outcome = fx
            .bank
            .transaction(|uow| {
                fx.bank.add_timeseries_from_paths(
                    uow,
                    &sources,
                    "Sentinel-2",
                    dates(&["2024-03-01", "2024-01-15", "2024-02-10"]),
                )
            })
            .unwrap();

        let ts: Timeseries = fx.bank.db().get(outcome.timeseries_id).unwrap();
        assert_eq!((ts.start_date.as_str(), ts.end_date.as_str()), ("2024-01-15", "2024-03-01"));

        let members = fx.bank.db().timeseries_tiles(outcome.timeseries_id).unwrap();
        let member_dates: Vec<_> = members.iter().map(|t| t.date_origin.clone().unwrap()).collect();
        assert_eq!(member_dates, vec!["2024-01-15", "2024-02-10", "2024-03-01"]);
        let positions: Vec<_> = fx
            .bank
            .db()
            .timeseries_links(outcome.timeseries_id)
            .unwrap()
            .iter()
            .map(|l| l.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_existing_member_keeps_cataloged_date() {
        let fx = Fixture::new();
        let old = fx.write_source("old.tif", &ramp(1, 4, 4), utm_transform(), Crs::Epsg(32633));
        let new = fx.write_source("new.tif", &(ramp(1, 4, 4) + 1.0), utm_transform(), Crs::Epsg(32633));
        let existing = fx
            .bank
            .transaction(|uow| fx.bank.add_single_tile_from_path(uow, &old, "Sentinel-2", Some("2020-01-01".into()), false))
            .unwrap();

        let outcome = fx
            .bank
            .transaction(|uow| {
                fx.bank.add_timeseries_from_paths(
                    uow,
                    &[new.clone(), old.clone()],
                    "Sentinel-2",
                    dates(&["2024-06-01", "2024-05-01"]),
                )
            })
            .unwrap();

        assert_eq!(outcome.tiles[0], InsertOutcome::AlreadyExists(existing.id()));
        let ts: Timeseries = fx.bank.db().get(outcome.timeseries_id).unwrap();
        assert_eq!((ts.start_date.as_str(), ts.end_date.as_str()), ("2020-01-01", "2024-06-01"));

        let members = fx.bank.db().timeseries_tiles(outcome.timeseries_id).unwrap();
        let member_dates: Vec<_> = members.iter().map(|t| t.date_origin.clone().unwrap()).collect();
        assert_eq!(member_dates, vec!["2020-01-01", "2024-06-01"]);
        assert_eq!(members[0].id, existing.id());
    }

    #[test]
    fn test_member_without_date_is_rejected() {
        let fx = Fixture::new();
        let undated = fx.write_source("undated.tif", &ramp(1, 4, 4), utm_transform(), Crs::Epsg(32633));
        fx.bank
            .transaction(|uow| fx.bank.add_single_tile_from_path(uow, &undated, "Sentinel-2", None, false))
            .unwrap();

        let err = fx
            .bank
            .transaction(|uow| {
                fx.bank.add_timeseries_from_paths(uow, &[undated.clone()], "Sentinel-2", dates(&["2024-01-01"]))
            })
            .unwrap_err();
        assert!(matches!(err, TileBankError::InvalidInput(_)));
        assert_eq!(fx.bank.db().count::<Timeseries>().unwrap(), 0);
        assert_eq!(fx.bank.db().count::<Tile>().unwrap(), 1);
    }

    #[test]
    fn test_length_mismatch_and_empty_rejected() {
        let fx = Fixture::new();
        let stack = Array4::<f32>::zeros((1, 1, 4, 4));
        let err = fx
            .bank
            .transaction(|uow| {
                fx.bank
                    .add_timeseries_from_array(uow, stack.view(), &georef(), "Sentinel-2", dates(&["2024-01-01", "2024-01-02"]))
            })
            .unwrap_err();
        assert!(matches!(err, TileBankError::InvalidInput(_)));

        let err = fx
            .bank
            .transaction(|uow| {
                let empty = Array4::<f32>::zeros((0, 1, 4, 4));
                fx.bank.add_timeseries_from_array(uow, empty.view(), &georef(), "Sentinel-2", Vec::new())
            })
            .unwrap_err();
        assert!(matches!(err, TileBankError::InvalidInput(_)));
        assert!(fx.stored_files().is_empty());
    }

    #[test]
    fn test_bad_member_date_stores_nothing() {
        let fx = Fixture::new();
        let stack = Array4::<f32>::ones((2, 1, 4, 4));
        let err = fx
            .bank
            .transaction(|uow| {
                fx.bank.add_timeseries_from_array(
                    uow,
                    stack.view(),
                    &georef(),
                    "Sentinel-2",
                    dates(&["2024-01-01", "2024/01/02"]),
                )
            })
            .unwrap_err();
        assert!(matches!(err, TileBankError::InvalidDateFormat(_)));
        assert!(fx.stored_files().is_empty());
        assert_eq!(fx.bank.db().count::<Tile>().unwrap(), 0);
    }

    #[test]
    fn test_multimodal_from_arrays() {
        let fx = Fixture::new();
        let high_res = ramp(3, 16, 16).into_dyn();
        let series = Array4::<f32>::ones((2, 2, 4, 4));

        let outcome = fx
            .bank
            .transaction(|uow| {
                fx.bank.add_multimodal_from_arrays(
                    uow,
                    high_res.view(),
                    &georef(),
                    "PleiadesNEO",
                    Some("2024-04-01".into()),
                    series.view(),
                    &georef(),
                    "Sentinel-2",
                    dates(&["2024-04-10", "2024-03-20"]),
                )
            })
            .unwrap();

        let row: Multimodal = fx.bank.db().get(outcome.multimodal_id).unwrap();
        assert_eq!(row.tile_id, outcome.tile.id());
        assert_eq!(row.timeseries_id, outcome.timeseries.timeseries_id);
        assert_eq!(fx.bank.db().count::<Tile>().unwrap(), 3);
        assert_eq!(fx.stored_files().len(), 3);
    }

    #[test]
    fn test_multimodal_is_all_or_nothing() {
        let fx = Fixture::new();
        let high_res = ramp(3, 16, 16).into_dyn();
        let not_square = Array4::<f32>::zeros((2, 2, 4, 5));

        let err = fx
            .bank
            .transaction(|uow| {
                fx.bank.add_multimodal_from_arrays(
                    uow,
                    high_res.view(),
                    &georef(),
                    "PleiadesNEO",
                    None,
                    not_square.view(),
                    &georef(),
                    "Sentinel-2",
                    dates(&["2024-01-01", "2024-01-02"]),
                )
            })
            .unwrap_err();
        assert!(matches!(err, TileBankError::InvalidShape(_)));
        assert!(fx.stored_files().is_empty());
        assert_eq!(fx.bank.db().count::<Tile>().unwrap(), 0);
        assert_eq!(fx.bank.db().count::<Multimodal>().unwrap(), 0);
    }

    #[test]
    fn test_timeseries_patch_sweep() {
        let fx = Fixture::new();
        let mut stack = Array4::<f32>::zeros((3, 2, 8, 8));
        stack.slice_mut(s![.., .., 0..4, ..]).fill(5.0);
        for t in 0..3 {
            stack.slice_mut(s![t, .., 0..4, 0..4]).fill(t as f32 + 1.0);
        }

        let outcomes = fx
            .bank
            .transaction(|uow| {
                fx.bank.save_timeseries_patches_from_array(
                    uow,
                    stack.view(),
                    &georef(),
                    "Sentinel-2",
                    dates(&["2024-01-03", "2024-01-01", "2024-01-02"]),
                    &SweepOptions::new(4),
                    non_empty,
                )
            })
            .unwrap();
        assert_eq!(outcomes.iter().map(|o| (o.row, o.col)).collect::<Vec<_>>(), vec![(0, 0), (0, 4)]);
        assert_eq!(fx.bank.db().count::<Timeseries>().unwrap(), 2);

        // Earliest date is input step 1, whose top-left cell holds 2.0.
        let first = &outcomes[0].timeseries;
        let tiles = fx.bank.db().timeseries_tiles(first.timeseries_id).unwrap();
        assert_eq!(tiles.len(), 3);
        assert_eq!(tiles[0].date_origin.as_deref(), Some("2024-01-01"));
        let data = fx.bank.codec().read(&tiles[0].path).unwrap().data;
        assert!(data.iter().all(|v| *v == 2.0));

        let second: Vec<Tile> = fx.bank.db().timeseries_tiles(outcomes[1].timeseries.timeseries_id).unwrap();
        assert_eq!(second[2].transform, derive_sub_transform(&georef().transform, 0, 4));

        let capped = fx
            .bank
            .transaction(|uow| {
                let mut options = SweepOptions::new(4);
                options.max_patches = Some(1);
                fx.bank.save_timeseries_patches_from_array(
                    uow,
                    stack.view(),
                    &georef(),
                    "Sentinel-2",
                    dates(&["2024-01-03", "2024-01-01", "2024-01-02"]),
                    &options,
                    accept_all,
                )
            })
            .unwrap();
        assert_eq!(capped.len(), 1);
    }
}
