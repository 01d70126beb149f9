use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::raster::FileFormat;
use crate::spatial::Crs;

/// Environment variable that points at an alternative config file.
pub const CONFIG_ENV: &str = "TILEBANK_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub patches: PatchConfig,

    #[serde(default)]
    pub spatial: SpatialConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory every tile and mask file is written to.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,

    #[serde(default)]
    pub format: FileFormat,
}

fn default_save_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilebank")
        .join("tiles")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            format: FileFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,

    /// Step between patches; defaults to the patch size (no overlap).
    #[serde(default)]
    pub stride: Option<usize>,

    /// Stop a sweep after this many stored patches.
    #[serde(default)]
    pub max_patches: Option<usize>,
}

fn default_patch_size() -> usize {
    256
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            patch_size: default_patch_size(),
            stride: None,
            max_patches: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialConfig {
    /// CRS tile footprints are stored in and overlap queries run in.
    #[serde(default = "default_working_crs")]
    pub working_crs: Crs,
}

fn default_working_crs() -> Crs {
    Crs::WGS84
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            working_crs: default_working_crs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for catalog events, overridden by `TILEBANK_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Send events to journald when it is reachable (Linux only).
    #[serde(default = "default_journald")]
    pub journald: bool,

    /// Directory for the rolling log file; defaults to the user data directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_journald() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            journald: default_journald(),
            dir: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilebank")
        .join("tilebank.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage: StorageConfig::default(),
            patches: PatchConfig::default(),
            spatial: SpatialConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing a default file if none exists.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file {}", config_path.display()))?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tilebank")
            .join("config.toml")
    }
}
