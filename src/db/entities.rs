//! The closed set of catalog entities and the generic row plumbing shared by
//! every table.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::ErrorCode;

use super::Database;
use crate::error::{Result, TileBankError};

/// Every table the catalog knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Satellite,
    Timeseries,
    Tile,
    TileCrs,
    TimeseriesLink,
    Mask,
    Multimodal,
}

impl Entity {
    pub fn table(&self) -> &'static str {
        match self {
            Entity::Satellite => "satellite",
            Entity::Timeseries => "timeseries",
            Entity::Tile => "tile",
            Entity::TileCrs => "tile_crs",
            Entity::TimeseriesLink => "timeseries_tile_link",
            Entity::Mask => "mask",
            Entity::Multimodal => "multimodal",
        }
    }

    /// Columns in the order [`CatalogRow::from_row`] reads them.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Entity::Satellite => &["id", "name", "resolution", "type"],
            Entity::Timeseries => &["id", "start_date", "end_date"],
            Entity::Tile => &[
                "id", "path", "satellite_id", "date_origin", "width", "height",
                "min_x", "min_y", "max_x", "max_y", "pixel_size_x", "pixel_size_y",
                "transform", "epsg",
                "footprint_min_x", "footprint_min_y", "footprint_max_x", "footprint_max_y",
            ],
            Entity::TileCrs => &["id", "tile_id", "crs"],
            Entity::TimeseriesLink => &["id", "timeseries_id", "tile_id", "position"],
            Entity::Mask => &[
                "id", "path", "tile_id", "timeseries_id", "task", "mask_type", "date_origin",
                "min_x", "min_y", "max_x", "max_y", "transform",
            ],
            Entity::Multimodal => &["id", "tile_id", "timeseries_id"],
        }
    }

    pub fn all() -> &'static [Entity] {
        &[
            Entity::Satellite,
            Entity::Timeseries,
            Entity::Tile,
            Entity::TileCrs,
            Entity::TimeseriesLink,
            Entity::Mask,
            Entity::Multimodal,
        ]
    }

    /// `SELECT <columns> FROM <table>`, with columns qualified by `alias`.
    pub(crate) fn select(&self, alias: &str) -> String {
        let columns: Vec<String> = self.columns().iter().map(|c| format!("{}.{}", alias, c)).collect();
        format!("SELECT {} FROM {} {}", columns.join(", "), self.table(), alias)
    }
}

/// A typed row of one entity.
pub trait CatalogRow: Sized {
    const ENTITY: Entity;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

/// A record that can be written as a new row of its entity.
pub trait Insertable {
    const ENTITY: Entity;

    /// Storage path, for entities whose path column is unique.
    fn path(&self) -> Option<&Path> {
        None
    }

    fn values(&self) -> Result<Vec<(&'static str, Value)>>;
}

/// Decode a JSON text column, reporting failures as a column conversion error.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            e.code == ErrorCode::ConstraintViolation
                && msg.as_deref().is_some_and(|m| m.starts_with("UNIQUE constraint failed") && m.ends_with(".path"))
        }
        _ => false,
    }
}

impl Database {
    // ========================================================================
    // Generic row access
    // ========================================================================

    pub fn get<T: CatalogRow>(&self, id: i64) -> Result<T> {
        self.find::<T>(id)?
            .ok_or_else(|| TileBankError::not_found(T::ENTITY.table(), format!("id = {}", id)))
    }

    pub fn find<T: CatalogRow>(&self, id: i64) -> Result<Option<T>> {
        let sql = format!("{} WHERE t.id = ?", T::ENTITY.select("t"));
        let result = self.conn.query_row(&sql, [id], T::from_row);
        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all<T: CatalogRow>(&self) -> Result<Vec<T>> {
        let sql = format!("{} ORDER BY t.id", T::ENTITY.select("t"));
        self.query_rows(&sql, [])
    }

    pub fn count<T: CatalogRow>(&self) -> Result<usize> {
        self.count_entity(T::ENTITY)
    }

    pub fn count_entity(&self, entity: Entity) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", entity.table());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub(crate) fn query_rows<T: CatalogRow, P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, T::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Insert `record` and return the new row id. A unique-path collision on
    /// a tile or mask is reported as [`TileBankError::DuplicateTile`].
    pub fn insert<R: Insertable>(&self, record: &R) -> Result<i64> {
        let values = record.values()?;
        let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            R::ENTITY.table(),
            columns.join(", "),
            placeholders.join(", ")
        );
        let params = rusqlite::params_from_iter(values.into_iter().map(|(_, v)| v));
        match self.conn.execute(&sql, params) {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => match record.path() {
                Some(path) => Err(TileBankError::DuplicateTile {
                    path: path.to_path_buf(),
                }),
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }
}
