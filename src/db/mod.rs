mod schema;
pub mod entities;
pub mod masks;
pub mod satellites;
pub mod tiles;
pub mod timeseries;
pub mod unit_of_work;

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub use entities::{CatalogRow, Entity, Insertable};
pub use masks::{Mask, MaskTask};
pub use satellites::{Satellite, SatelliteType};
pub use schema::{SCHEMA, SEED_SATELLITES};
pub use tiles::{NewTileCrs, Tile, TileCrs};
pub use timeseries::{Multimodal, NewMultimodal, NewTimeseries, NewTimeseriesLink, Timeseries, TimeseriesLink};
pub use unit_of_work::UnitOfWork;

/// The relational side of the catalog: one SQLite connection with foreign
/// keys enforced.
pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    /// Open (creating if needed) the catalog at `path` and make sure the
    /// schema and seed rows exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Self {
            conn: Connection::open(path)?,
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA)?;
        self.seed_satellites()?;
        Ok(())
    }

    /// Insert the built-in sensors into an empty satellite table.
    fn seed_satellites(&self) -> Result<()> {
        if self.count::<Satellite>()? > 0 {
            return Ok(());
        }
        for (name, resolution, kind) in SEED_SATELLITES {
            self.conn.execute(
                "INSERT INTO satellite (name, resolution, type) VALUES (?, ?, ?)",
                rusqlite::params![name, resolution, kind],
            )?;
        }
        info!(count = SEED_SATELLITES.len(), "seeded satellite table");
        Ok(())
    }

    /// Start an explicit transaction on this connection.
    pub fn begin(&self) -> Result<UnitOfWork<'_>> {
        UnitOfWork::begin(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_and_seeds_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/catalog.db");
        {
            let db = Database::open(&path).unwrap();
            assert_eq!(db.count::<Satellite>().unwrap(), 5);
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.count::<Satellite>().unwrap(), 5);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        let result = db.conn.execute(
            "INSERT INTO multimodal (tile_id, timeseries_id) VALUES (999, 999)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_check_constraints() {
        let db = Database::open_in_memory().unwrap();
        assert!(db
            .conn
            .execute("INSERT INTO satellite (name, resolution, type) VALUES ('x', 1, 'sonar')", [])
            .is_err());
        assert!(db
            .conn
            .execute("INSERT INTO timeseries (start_date, end_date) VALUES ('2024-02-01', '2024-01-01')", [])
            .is_err());
    }
}
