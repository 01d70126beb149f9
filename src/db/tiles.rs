//! Tile rows, their CRS and spatial lookups.

use std::path::{Path, PathBuf};

use rusqlite::params;
use rusqlite::types::Value;
use serde::Serialize;

use super::entities::json_column;
use super::{CatalogRow, Database, Entity, Insertable};
use crate::error::{Result, TileBankError};
use crate::spatial::{Affine, Bounds, Crs};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tile {
    pub id: i64,
    pub path: PathBuf,
    pub satellite_id: i64,
    pub date_origin: Option<String>,
    pub width: i64,
    pub height: i64,
    /// Native bounds in the tile's own CRS.
    pub bounds: Bounds,
    pub pixel_size: (f64, f64),
    pub transform: Affine,
    pub epsg: Option<u32>,
    pub footprint: Option<Bounds>,
}

pub(crate) fn bounds_at(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<Bounds> {
    Ok(Bounds::new(row.get(start)?, row.get(start + 1)?, row.get(start + 2)?, row.get(start + 3)?))
}

fn optional_bounds_at(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<Option<Bounds>> {
    let values: [Option<f64>; 4] = [row.get(start)?, row.get(start + 1)?, row.get(start + 2)?, row.get(start + 3)?];
    Ok(match values {
        [Some(a), Some(b), Some(c), Some(d)] => Some(Bounds::new(a, b, c, d)),
        _ => None,
    })
}

impl CatalogRow for Tile {
    const ENTITY: Entity = Entity::Tile;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Tile {
            id: row.get(0)?,
            path: PathBuf::from(row.get::<_, String>(1)?),
            satellite_id: row.get(2)?,
            date_origin: row.get(3)?,
            width: row.get(4)?,
            height: row.get(5)?,
            bounds: bounds_at(row, 6)?,
            pixel_size: (row.get(10)?, row.get(11)?),
            transform: json_column(row, 12)?,
            epsg: row.get(13)?,
            footprint: optional_bounds_at(row, 14)?,
        })
    }
}

/// CRS text of a tile that has no EPSG code.
#[derive(Debug, Clone, PartialEq)]
pub struct TileCrs {
    pub id: i64,
    pub tile_id: i64,
    pub crs: String,
}

impl CatalogRow for TileCrs {
    const ENTITY: Entity = Entity::TileCrs;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(TileCrs {
            id: row.get(0)?,
            tile_id: row.get(1)?,
            crs: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewTileCrs<'a> {
    pub tile_id: i64,
    pub crs: &'a str,
}

impl Insertable for NewTileCrs<'_> {
    const ENTITY: Entity = Entity::TileCrs;

    fn values(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("tile_id", Value::Integer(self.tile_id)),
            ("crs", Value::Text(self.crs.to_string())),
        ])
    }
}

impl Database {
    // ========================================================================
    // Tile lookups
    // ========================================================================

    /// The tile stored at exactly `path`.
    pub fn find_tile_by_path(&self, path: &Path) -> Result<Tile> {
        let criteria = || format!("path = {:?}", path.display().to_string());
        let sql = format!("{} WHERE t.path = ?", Entity::Tile.select("t"));
        let mut matches: Vec<Tile> = self.query_rows(&sql, [path.to_string_lossy()])?;
        match matches.len() {
            0 => Err(TileBankError::not_found("tile", criteria())),
            1 => Ok(matches.remove(0)),
            count => Err(TileBankError::AmbiguousRecord {
                entity: "tile",
                criteria: criteria(),
                count,
            }),
        }
    }

    /// Id of the tile or mask row already stored at `path`, if any.
    pub fn id_for_path(&self, entity: Entity, path: &Path) -> Result<Option<i64>> {
        let sql = format!("SELECT id FROM {} WHERE path = ?", entity.table());
        let result = self.conn.query_row(&sql, [path.to_string_lossy()], |row| row.get(0));
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The tile's CRS, from its EPSG column or its `tile_crs` row.
    pub fn tile_crs(&self, tile_id: i64) -> Result<Crs> {
        let tile: Tile = self.get(tile_id)?;
        let text: Option<String> = match self.conn.query_row(
            "SELECT crs FROM tile_crs WHERE tile_id = ?",
            params![tile_id],
            |row| row.get(0),
        ) {
            Ok(text) => Some(text),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        match (tile.epsg, text) {
            (Some(code), None) => Ok(Crs::Epsg(code)),
            (None, Some(text)) => Ok(Crs::Wkt(text)),
            _ => Err(TileBankError::InconsistentCrs { tile_id }),
        }
    }

    /// Tiles whose working-CRS footprint intersects `query` (closed intervals).
    pub fn tiles_intersecting(&self, query: &Bounds) -> Result<Vec<Tile>> {
        let sql = format!(
            "{} WHERE t.footprint_max_x >= ?1 AND t.footprint_min_x <= ?3 \
             AND t.footprint_max_y >= ?2 AND t.footprint_min_y <= ?4 ORDER BY t.id",
            Entity::Tile.select("t")
        );
        self.query_rows(&sql, params![query.min_x, query.min_y, query.max_x, query.max_y])
    }

    pub fn tiles_with_footprint(&self) -> Result<Vec<Tile>> {
        let sql = format!("{} WHERE t.footprint_min_x IS NOT NULL ORDER BY t.id", Entity::Tile.select("t"));
        self.query_rows(&sql, [])
    }

    pub fn tiles_for_satellite(&self, satellite_id: i64) -> Result<Vec<Tile>> {
        let sql = format!("{} WHERE t.satellite_id = ? ORDER BY t.id", Entity::Tile.select("t"));
        self.query_rows(&sql, [satellite_id])
    }
}
