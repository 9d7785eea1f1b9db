// farmdb-backup/src/logging.rs
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::BackupClass;
use crate::errors::{AppError, Result};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// `<logs_dir>/backup_<class>_<YYYYMMDD>.log`
pub fn log_file_path(logs_dir: &Path, class: BackupClass) -> PathBuf {
    logs_dir.join(format!(
        "backup_{}_{}.log",
        class,
        Utc::now().format("%Y%m%d")
    ))
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AppError::fs("create log directory", parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::fs("open log file", path, e))
}

/// Backup runs: colored lines on stdout, plain lines appended to the
/// per-class daily logfile.
pub fn init_backup_logging(logs_dir: &Path, class: BackupClass) -> Result<PathBuf> {
    let path = log_file_path(logs_dir, class);
    let file = Arc::new(open_append(&path)?);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stdout).with_target(false))
        .with(
            fmt::layer()
                .with_writer(file)
                .with_target(false)
                .with_ansi(false),
        )
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to install logger: {}", e)))?;
    Ok(path)
}

/// Probes and verification: stderr only, so stdout carries just the report.
pub fn init_stderr_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to install logger: {}", e)))
}
