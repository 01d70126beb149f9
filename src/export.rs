//! Dump the tile catalog for dataset tooling.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::db::Database;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    /// Format implied by the output file's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => bail!("cannot export to {}: expected a .csv or .json file", path.display()),
        }
    }
}

/// One tile as it appears in an export.
#[derive(Debug, Serialize)]
pub struct ExportedTile {
    pub id: i64,
    pub path: String,
    pub satellite: String,
    pub date_origin: Option<String>,
    pub width: i64,
    pub height: i64,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub crs: String,
    pub masks: i64,
    pub timeseries: i64,
}

/// Export every tile to `output_path`; returns the number written.
pub fn export_tiles(db: &Database, output_path: &Path, format: ExportFormat) -> Result<usize> {
    let tiles = get_tiles_for_export(db)?;
    let count = tiles.len();

    match format {
        ExportFormat::Json => export_json(&tiles, output_path)?,
        ExportFormat::Csv => export_csv(&tiles, output_path)?,
    }

    tracing::info!(count, path = %output_path.display(), "exported tiles");
    Ok(count)
}

fn get_tiles_for_export(db: &Database) -> Result<Vec<ExportedTile>> {
    let mut stmt = db.conn.prepare(
        r#"
        SELECT
            t.id,
            t.path,
            s.name,
            t.date_origin,
            t.width,
            t.height,
            t.min_x,
            t.min_y,
            t.max_x,
            t.max_y,
            COALESCE('EPSG:' || t.epsg, c.crs, ''),
            (SELECT COUNT(*) FROM mask m WHERE m.tile_id = t.id),
            (SELECT COUNT(*) FROM timeseries_tile_link l WHERE l.tile_id = t.id)
        FROM tile t
        JOIN satellite s ON s.id = t.satellite_id
        LEFT JOIN tile_crs c ON c.tile_id = t.id
        ORDER BY t.id
        "#,
    )?;

    let tiles = stmt
        .query_map([], |row| {
            Ok(ExportedTile {
                id: row.get(0)?,
                path: row.get(1)?,
                satellite: row.get(2)?,
                date_origin: row.get(3)?,
                width: row.get(4)?,
                height: row.get(5)?,
                min_x: row.get(6)?,
                min_y: row.get(7)?,
                max_x: row.get(8)?,
                max_y: row.get(9)?,
                crs: row.get(10)?,
                masks: row.get(11)?,
                timeseries: row.get(12)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read tiles for export")?;

    Ok(tiles)
}

fn export_json(tiles: &[ExportedTile], output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(tiles)?;
    let mut file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn export_csv(tiles: &[ExportedTile], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    // Header comes from the struct's field names
    for tile in tiles {
        wtr.serialize(tile)?;
    }

    wtr.flush()?;
    Ok(())
}
