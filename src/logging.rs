//! Logging setup for the `tilebank` binary.
//!
//! Library code only emits `tracing` events under the `tilebank` target; the
//! binary routes them to journald on Linux or to a daily rolling file.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Environment variable holding a full filter, e.g. `TILEBANK_LOG=tilebank=debug`.
/// It replaces the configured level when set.
pub const LOG_ENV: &str = "TILEBANK_LOG";

const SYSLOG_IDENTIFIER: &str = "tilebank";
const LOG_FILE_PREFIX: &str = "tilebank.log";

/// Where events ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBackend {
    Journald,
    File(PathBuf),
}

/// Catalog events at `level`; other crates (rusqlite, tiff) only at warn.
fn directives(level: &str) -> String {
    format!("warn,tilebank={}", level)
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    EnvFilter::try_new(directives(&config.level))
        .with_context(|| format!("Invalid log level {:?}", config.level))
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilebank")
        .join("logs")
}

/// Install the global subscriber described by `config`.
pub fn init(config: &LoggingConfig) -> Result<LogBackend> {
    let filter = env_filter(config)?;

    #[cfg(target_os = "linux")]
    {
        if config.journald {
            if let Ok(journald_layer) = tracing_journald::layer() {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(journald_layer.with_syslog_identifier(SYSLOG_IDENTIFIER.to_string()))
                    .try_init()
                    .context("Logging was already initialized")?;
                return Ok(LogBackend::Journald);
            }
        }
    }

    let log_dir = config.dir.clone().unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The worker flushes on drop, so it has to outlive main.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> = std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(false))
        .try_init()
        .context("Logging was already initialized")?;

    Ok(LogBackend::File(log_dir))
}
