//! The transactional catalog: every stored array file is paired with exactly
//! one tile or mask row, and both disappear together on failure.

mod masks;
mod tiles;
mod timeseries;

use std::path::{Path, PathBuf};

use ndarray::ArrayView3;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{Database, Entity, NewTileCrs, UnitOfWork};
use crate::error::{Result, TileBankError};
use crate::raster::{FileFormat, FsRasterCodec, GeoReference, RasterCodec};
use crate::record::TileRecord;
use crate::spatial::{compute_bounds, reconcile_crs, Bounds, Crs, Proj4Reprojector, Reprojector};

pub use masks::{MaskOutcome, MaskedPatchOutcome};
pub use tiles::PatchOutcome;
pub use timeseries::{MultimodalOutcome, TimeseriesOutcome, TimeseriesPatchOutcome};

/// Result of an insert that tolerates an existing row at the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(i64),
    AlreadyExists(i64),
}

impl InsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            InsertOutcome::Created(id) | InsertOutcome::AlreadyExists(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, InsertOutcome::Created(_))
    }
}

/// How a patch sweep walks its source.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub patch_size: usize,
    pub stride: Option<usize>,
    pub max_patches: Option<usize>,
    /// Overrides the catalog's default file format.
    pub format: Option<FileFormat>,
}

impl SweepOptions {
    pub fn new(patch_size: usize) -> Self {
        Self {
            patch_size,
            stride: None,
            max_patches: None,
            format: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            patch_size: config.patches.patch_size,
            stride: config.patches.stride,
            max_patches: config.patches.max_patches,
            format: None,
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.max_patches.unwrap_or(usize::MAX)
    }
}

/// Where files go and which CRS footprints are kept in.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub save_dir: PathBuf,
    pub format: FileFormat,
    pub working_crs: Crs,
}

impl StorageSettings {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            format: FileFormat::default(),
            working_crs: Crs::WGS84,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            save_dir: config.storage.save_dir.clone(),
            format: config.storage.format,
            working_crs: config.spatial.working_crs.clone(),
        }
    }
}

pub struct TileBank {
    db: Database,
    settings: StorageSettings,
    codec: Box<dyn RasterCodec>,
    reprojector: Box<dyn Reprojector>,
}

impl TileBank {
    /// Open the catalog described by `config` with the filesystem codec and
    /// the proj4rs reprojector.
    pub fn open(config: &Config) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        Self::with_components(
            db,
            StorageSettings::from_config(config),
            Box::new(FsRasterCodec),
            Box::new(Proj4Reprojector::new()),
        )
    }

    pub fn with_components(
        db: Database,
        settings: StorageSettings,
        codec: Box<dyn RasterCodec>,
        reprojector: Box<dyn Reprojector>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&settings.save_dir)?;
        Ok(Self {
            db,
            settings,
            codec,
            reprojector,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn save_dir(&self) -> &Path {
        &self.settings.save_dir
    }

    pub fn format(&self) -> FileFormat {
        self.settings.format
    }

    pub fn working_crs(&self) -> &Crs {
        &self.settings.working_crs
    }

    pub fn codec(&self) -> &dyn RasterCodec {
        self.codec.as_ref()
    }

    pub fn reprojector(&self) -> &dyn Reprojector {
        self.reprojector.as_ref()
    }

    pub fn begin(&self) -> Result<UnitOfWork<'_>> {
        self.db.begin()
    }

    /// Run `f` in a fresh transaction: committed on `Ok`, rolled back (rows
    /// and files) on `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    {
        let mut uow = self.db.begin()?;
        match f(&mut uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(e) => {
                uow.rollback();
                Err(e)
            }
        }
    }

    // ========================================================================
    // Storage helpers
    // ========================================================================

    pub(crate) fn storage_path(&self, stem: &str, format: FileFormat) -> PathBuf {
        self.settings
            .save_dir
            .join(format!("{}.{}", stem, format.extension()))
    }

    pub(crate) fn fresh_path(&self, format: FileFormat) -> PathBuf {
        self.storage_path(&Uuid::new_v4().to_string(), format)
    }

    /// Deterministic storage path for a source file, so re-adding it collides.
    pub(crate) fn source_path(&self, source: &Path, format: FileFormat) -> Result<PathBuf> {
        let canonical = std::fs::canonicalize(source)?;
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical.to_string_lossy().as_bytes());
        Ok(self.storage_path(&id.to_string(), format))
    }

    /// `bounds` expressed in the working CRS, or `None` (logged) when the
    /// CRS cannot be reprojected.
    pub(crate) fn footprint(&self, bounds: &Bounds, crs: &Crs) -> Option<Bounds> {
        match reconcile_crs(bounds, crs, &self.settings.working_crs, self.reprojector.as_ref()) {
            Ok(footprint) if footprint.is_finite() => Some(footprint),
            Ok(_) => {
                warn!(crs = %crs, "footprint is not finite, tile will not be searchable");
                None
            }
            Err(e) => {
                warn!(crs = %crs, error = %e, "cannot reproject tile bounds, tile will not be searchable");
                None
            }
        }
    }

    /// Write+insert primitive.
    ///
    /// Inside one atomic level: the array is written to a staging file, the
    /// row for `target` is inserted by `insert`, then the staging file is
    /// renamed to `target`. Any failure discards the row and the file. A
    /// unique-path collision becomes [`InsertOutcome::AlreadyExists`] when
    /// `exists_ok` is set.
    pub(crate) fn persist<F>(
        &self,
        uow: &mut UnitOfWork<'_>,
        entity: Entity,
        array: ArrayView3<'_, f32>,
        georef: Option<&GeoReference>,
        target: &Path,
        exists_ok: bool,
        insert: F,
    ) -> Result<InsertOutcome>
    where
        F: FnOnce(&Database) -> Result<i64>,
    {
        if exists_ok {
            if let Some(id) = uow.db().id_for_path(entity, target)? {
                return Ok(InsertOutcome::AlreadyExists(id));
            }
        }

        let format = FileFormat::from_path(target)?;
        let staging = self.storage_path(&format!(".staging-{}", Uuid::new_v4()), format);

        let result = uow.atomic(|uow| {
            uow.track_file(&staging);
            self.codec.write(array, &staging, georef)?;
            let id = insert(uow.db())?;
            if target.exists() {
                // A file nobody cataloged; never overwrite it.
                return Err(TileBankError::DuplicateTile {
                    path: target.to_path_buf(),
                });
            }
            std::fs::rename(&staging, target)?;
            uow.retrack_file(&staging, target);
            Ok(id)
        });

        match result {
            Ok(id) => {
                debug!(entity = entity.table(), id, path = %target.display(), "persisted");
                Ok(InsertOutcome::Created(id))
            }
            Err(TileBankError::DuplicateTile { path }) if exists_ok => match uow.db().id_for_path(entity, &path)? {
                Some(id) => Ok(InsertOutcome::AlreadyExists(id)),
                None => Err(TileBankError::DuplicateTile { path }),
            },
            Err(e) => Err(e),
        }
    }

    /// Insert a tile row plus its CRS side-table row, then confirm the tile
    /// has exactly one CRS representation.
    pub(crate) fn insert_tile_row(db: &Database, record: &TileRecord) -> Result<i64> {
        let id = db.insert(record)?;
        if let Some(text) = record.crs_text() {
            db.insert(&NewTileCrs { tile_id: id, crs: text })?;
        }
        db.tile_crs(id)?;
        Ok(id)
    }

    /// Store `data` as a tile at `target`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn store_tile(
        &self,
        uow: &mut UnitOfWork<'_>,
        data: ArrayView3<'_, f32>,
        satellite_id: i64,
        date: Option<String>,
        georef: &GeoReference,
        target: &Path,
        exists_ok: bool,
    ) -> Result<InsertOutcome> {
        let (_, height, width) = data.dim();
        let bounds = compute_bounds(&georef.transform, width, height)?;
        let footprint = self.footprint(&bounds, &georef.crs);
        let record = TileRecord::build(
            target,
            satellite_id,
            date,
            bounds,
            (width, height),
            georef.transform,
            georef.crs.clone(),
            footprint,
        );
        self.persist(uow, Entity::Tile, data, Some(georef), target, exists_ok, |db| {
            Self::insert_tile_row(db, &record)
        })
    }
}
