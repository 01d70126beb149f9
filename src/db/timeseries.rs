//! Timeseries, their tile links, and multimodal pairings.

use rusqlite::types::Value;
use serde::Serialize;

use super::{CatalogRow, Database, Entity, Insertable, Tile};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeseries {
    pub id: i64,
    pub start_date: String,
    pub end_date: String,
}

impl CatalogRow for Timeseries {
    const ENTITY: Entity = Entity::Timeseries;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Timeseries {
            id: row.get(0)?,
            start_date: row.get(1)?,
            end_date: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewTimeseries {
    pub start_date: String,
    pub end_date: String,
}

impl Insertable for NewTimeseries {
    const ENTITY: Entity = Entity::Timeseries;

    fn values(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("start_date", Value::Text(self.start_date.clone())),
            ("end_date", Value::Text(self.end_date.clone())),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeseriesLink {
    pub id: i64,
    pub timeseries_id: i64,
    pub tile_id: i64,
    pub position: i64,
}

impl CatalogRow for TimeseriesLink {
    const ENTITY: Entity = Entity::TimeseriesLink;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(TimeseriesLink {
            id: row.get(0)?,
            timeseries_id: row.get(1)?,
            tile_id: row.get(2)?,
            position: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewTimeseriesLink {
    pub timeseries_id: i64,
    pub tile_id: i64,
    pub position: i64,
}

impl Insertable for NewTimeseriesLink {
    const ENTITY: Entity = Entity::TimeseriesLink;

    fn values(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("timeseries_id", Value::Integer(self.timeseries_id)),
            ("tile_id", Value::Integer(self.tile_id)),
            ("position", Value::Integer(self.position)),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Multimodal {
    pub id: i64,
    pub tile_id: i64,
    pub timeseries_id: i64,
}

impl CatalogRow for Multimodal {
    const ENTITY: Entity = Entity::Multimodal;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Multimodal {
            id: row.get(0)?,
            tile_id: row.get(1)?,
            timeseries_id: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewMultimodal {
    pub tile_id: i64,
    pub timeseries_id: i64,
}

impl Insertable for NewMultimodal {
    const ENTITY: Entity = Entity::Multimodal;

    fn values(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("tile_id", Value::Integer(self.tile_id)),
            ("timeseries_id", Value::Integer(self.timeseries_id)),
        ])
    }
}

impl Database {
    // ========================================================================
    // Timeseries membership
    // ========================================================================

    /// Member tiles in link order (ascending date).
    pub fn timeseries_tiles(&self, timeseries_id: i64) -> Result<Vec<Tile>> {
        let sql = format!(
            "{} JOIN timeseries_tile_link l ON l.tile_id = t.id WHERE l.timeseries_id = ? ORDER BY l.position",
            Entity::Tile.select("t")
        );
        self.query_rows(&sql, [timeseries_id])
    }

    pub fn timeseries_links(&self, timeseries_id: i64) -> Result<Vec<TimeseriesLink>> {
        let sql = format!(
            "{} WHERE t.timeseries_id = ? ORDER BY t.position",
            Entity::TimeseriesLink.select("t")
        );
        self.query_rows(&sql, [timeseries_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TileRecord;
    use crate::spatial::{Affine, Bounds, Crs};

    fn tile(db: &Database, path: &str, date: &str) -> i64 {
        db.insert(&TileRecord::build(
            path,
            1,
            Some(date.into()),
            Bounds::new(0.0, 0.0, 1.0, 1.0),
            (1, 1),
            Affine::north_up(0.0, 1.0, 1.0, 1.0),
            Crs::Epsg(4326),
            None,
        ))
        .unwrap()
    }

    #[test]
    fn test_links_come_back_in_position_order() {
        let db = Database::open_in_memory().unwrap();
        let late = tile(&db, "/a.npy", "2024-03-01");
        let early = tile(&db, "/b.npy", "2024-01-01");
        let ts = db
            .insert(&NewTimeseries {
                start_date: "2024-01-01".into(),
                end_date: "2024-03-01".into(),
            })
            .unwrap();
        // Inserted out of order on purpose.
        db.insert(&NewTimeseriesLink { timeseries_id: ts, tile_id: late, position: 1 }).unwrap();
        db.insert(&NewTimeseriesLink { timeseries_id: ts, tile_id: early, position: 0 }).unwrap();

        let ids: Vec<i64> = db.timeseries_tiles(ts).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![early, late]);
        assert_eq!(db.timeseries_links(ts).unwrap()[0].tile_id, early);
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let db = Database::open_in_memory().unwrap();
        let a = tile(&db, "/a.npy", "2024-01-01");
        let ts = db
            .insert(&NewTimeseries {
                start_date: "2024-01-01".into(),
                end_date: "2024-01-01".into(),
            })
            .unwrap();
        db.insert(&NewTimeseriesLink { timeseries_id: ts, tile_id: a, position: 0 }).unwrap();
        assert!(db.insert(&NewTimeseriesLink { timeseries_id: ts, tile_id: a, position: 0 }).is_err());
    }

    #[test]
    fn test_multimodal_row() {
        let db = Database::open_in_memory().unwrap();
        let hr = tile(&db, "/hr.npy", "2024-01-01");
        let ts = db
            .insert(&NewTimeseries {
                start_date: "2024-01-01".into(),
                end_date: "2024-02-01".into(),
            })
            .unwrap();
        let id = db.insert(&NewMultimodal { tile_id: hr, timeseries_id: ts }).unwrap();
        let row: Multimodal = db.get(id).unwrap();
        assert_eq!((row.tile_id, row.timeseries_id), (hr, ts));
    }
}
