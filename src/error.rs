//! Error taxonomy for the catalog library.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileBankError {
    /// Caller-supplied array fails the dimensionality or squareness checks.
    #[error("invalid array shape: {0}")]
    InvalidShape(String),

    #[error("date must be in the format YYYY-MM-DD, got {0:?}")]
    InvalidDateFormat(String),

    /// A tile or mask with this storage path is already cataloged.
    #[error("a record with path {} already exists", path.display())]
    DuplicateTile { path: PathBuf },

    #[error("no {entity} record matches {criteria}")]
    RecordNotFound { entity: &'static str, criteria: String },

    #[error("{count} {entity} records match {criteria}, expected exactly one")]
    AmbiguousRecord {
        entity: &'static str,
        criteria: String,
        count: usize,
    },

    /// Two rasters that must be co-registered differ in size, CRS or transform.
    #[error("raster sources do not match: {0}")]
    MismatchedSources(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    /// Tile has both or neither of an EPSG code and a WKT side-table row.
    #[error("tile {tile_id} must have exactly one CRS representation")]
    InconsistentCrs { tile_id: i64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("projection failed: {0}")]
    Projection(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TileBankError>;

impl TileBankError {
    pub(crate) fn not_found(entity: &'static str, criteria: impl Into<String>) -> Self {
        TileBankError::RecordNotFound {
            entity,
            criteria: criteria.into(),
        }
    }
}
