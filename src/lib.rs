//! TileBank: a catalog of satellite raster tiles, their masks, timeseries and
//! multimodal pairings, with every cataloged row backed by exactly one file.

pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod export;
pub mod logging;
pub mod overlap;
pub mod patches;
pub mod raster;
pub mod record;
pub mod repository;
pub mod spatial;

pub use config::Config;
pub use db::{Database, Entity, MaskTask, UnitOfWork};
pub use error::{Result, TileBankError};
pub use overlap::OverlapResolver;
pub use patches::{Patch, PatchGrid};
pub use raster::{FileFormat, FsRasterCodec, GeoReference, Raster, RasterCodec};
pub use record::{parse_date_origin, DateInput};
pub use repository::{InsertOutcome, StorageSettings, SweepOptions, TileBank};
pub use spatial::{Affine, Bounds, Crs, Proj4Reprojector, Reprojector, Resampling};
