//! Satellite (sensor) rows.

use serde::{Deserialize, Serialize};

use super::{CatalogRow, Database, Entity};
use crate::error::{Result, TileBankError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SatelliteType {
    Optic,
    Radar,
}

impl SatelliteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SatelliteType::Optic => "optic",
            SatelliteType::Radar => "radar",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "optic" => Some(SatelliteType::Optic),
            "radar" => Some(SatelliteType::Radar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Satellite {
    pub id: i64,
    pub name: String,
    /// Ground resolution in cm per pixel.
    pub resolution: i64,
    pub kind: SatelliteType,
}

impl CatalogRow for Satellite {
    const ENTITY: Entity = Entity::Satellite;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(3)?;
        let kind = SatelliteType::from_str(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown satellite type {:?}", kind).into(),
            )
        })?;
        Ok(Satellite {
            id: row.get(0)?,
            name: row.get(1)?,
            resolution: row.get(2)?,
            kind,
        })
    }
}

impl Database {
    // ========================================================================
    // Satellite lookups
    // ========================================================================

    /// The single satellite called `name`.
    pub fn find_satellite(&self, name: &str) -> Result<Satellite> {
        let sql = format!("{} WHERE t.name = ?", Entity::Satellite.select("t"));
        let mut matches: Vec<Satellite> = self.query_rows(&sql, [name])?;
        match matches.len() {
            0 => Err(TileBankError::not_found("satellite", format!("name = {:?}", name))),
            1 => Ok(matches.remove(0)),
            count => Err(TileBankError::AmbiguousRecord {
                entity: "satellite",
                criteria: format!("name = {:?}", name),
                count,
            }),
        }
    }
}
