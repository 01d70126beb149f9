//! Mask rows.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::entities::json_column;
use super::tiles::bounds_at;
use super::{CatalogRow, Database, Entity};
use crate::error::{Result, TileBankError};
use crate::spatial::{Affine, Bounds};

/// Labelling task a mask was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskTask {
    Ntp,
    FieldDelineation,
    PermStructures,
}

impl MaskTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskTask::Ntp => "ntp",
            MaskTask::FieldDelineation => "field_delineation",
            MaskTask::PermStructures => "perm_structures",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ntp" => Some(MaskTask::Ntp),
            "field_delineation" => Some(MaskTask::FieldDelineation),
            "perm_structures" => Some(MaskTask::PermStructures),
            _ => None,
        }
    }

    /// Parse a task name, reporting the accepted values on failure.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            TileBankError::InvalidInput(format!(
                "unknown mask task {:?} (expected ntp, field_delineation or perm_structures)",
                s
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mask {
    pub id: i64,
    pub path: PathBuf,
    pub tile_id: i64,
    pub timeseries_id: Option<i64>,
    pub task: MaskTask,
    pub mask_type: String,
    pub date_origin: Option<String>,
    pub bounds: Bounds,
    pub transform: Affine,
}

impl CatalogRow for Mask {
    const ENTITY: Entity = Entity::Mask;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let task: String = row.get(4)?;
        let task = MaskTask::from_str(&task).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown mask task {:?}", task).into(),
            )
        })?;
        Ok(Mask {
            id: row.get(0)?,
            path: PathBuf::from(row.get::<_, String>(1)?),
            tile_id: row.get(2)?,
            timeseries_id: row.get(3)?,
            task,
            mask_type: row.get(5)?,
            date_origin: row.get(6)?,
            bounds: bounds_at(row, 7)?,
            transform: json_column(row, 11)?,
        })
    }
}

impl Database {
    // ========================================================================
    // Mask lookups
    // ========================================================================

    pub fn masks_for_tile(&self, tile_id: i64) -> Result<Vec<Mask>> {
        let sql = format!("{} WHERE t.tile_id = ? ORDER BY t.id", Entity::Mask.select("t"));
        self.query_rows(&sql, [tile_id])
    }

    pub fn masks_for_task(&self, task: MaskTask) -> Result<Vec<Mask>> {
        let sql = format!("{} WHERE t.task = ? ORDER BY t.id", Entity::Mask.select("t"));
        self.query_rows(&sql, [task.as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Tile;
    use crate::record::{MaskRecord, TileRecord};
    use crate::spatial::Crs;

    fn parent(db: &Database) -> Tile {
        let id = db
            .insert(&TileRecord::build(
                "/data/t.npy",
                1,
                Some("2024-06-01".into()),
                Bounds::new(0.0, 0.0, 4.0, 4.0),
                (4, 4),
                Affine::north_up(0.0, 4.0, 1.0, 1.0),
                Crs::Epsg(32633),
                None,
            ))
            .unwrap();
        db.get(id).unwrap()
    }

    #[test]
    fn test_task_names() {
        for task in [MaskTask::Ntp, MaskTask::FieldDelineation, MaskTask::PermStructures] {
            assert_eq!(MaskTask::from_str(task.as_str()), Some(task));
        }
        assert!(matches!(MaskTask::parse("roads"), Err(TileBankError::InvalidInput(_))));
    }

    #[test]
    fn test_mask_copies_parent_geometry() {
        let db = Database::open_in_memory().unwrap();
        let tile = parent(&db);
        let record = MaskRecord::from_parent("/data/m.npy", &tile, MaskTask::Ntp, "binary", None, None);
        let id = db.insert(&record).unwrap();

        let mask: Mask = db.get(id).unwrap();
        assert_eq!(mask.bounds, tile.bounds);
        assert_eq!(mask.transform, tile.transform);
        assert_eq!(mask.date_origin.as_deref(), Some("2024-06-01"));
        assert_eq!(db.masks_for_tile(tile.id).unwrap().len(), 1);
        assert_eq!(db.masks_for_task(MaskTask::Ntp).unwrap().len(), 1);
        assert!(db.masks_for_task(MaskTask::PermStructures).unwrap().is_empty());
    }

    #[test]
    fn test_mask_needs_existing_tile() {
        let db = Database::open_in_memory().unwrap();
        let mut tile = parent(&db);
        tile.id = 999;
        let record = MaskRecord::from_parent("/data/m.npy", &tile, MaskTask::Ntp, "binary", None, None);
        assert!(matches!(db.insert(&record), Err(TileBankError::Database(_))));
    }
}
