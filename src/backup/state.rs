// farmdb-backup/src/backup/state.rs
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{BackupClass, BackupMode};
use crate::errors::{AppError, Result};
use crate::utils::write_atomic;

pub const ANCHOR_FILE: &str = "last_backup.state";
pub const LAST_BACKUP_FILE: &str = "last_backup.json";

/// Pointer to the most recent successful artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastBackup {
    pub class: BackupClass,
    pub mode: BackupMode,
    pub run_id: String,
    pub timestamp: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
    pub compressed: bool,
}

/// Single-writer store for the incremental anchor and the last-backup pointer.
/// Both files are only rewritten after a run completes successfully.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Timestamp the last successful run advanced the state to. A missing
    /// file yields `None`; so does a file that does not parse, after a warning.
    pub fn read_anchor(&self) -> Result<Option<DateTime<Utc>>> {
        let path = self.dir.join(ANCHOR_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::fs("read", &path, e)),
        };
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable incremental anchor");
                Ok(None)
            }
        }
    }

    pub fn read_last_backup(&self) -> Result<Option<LastBackup>> {
        let path = self.dir.join(LAST_BACKUP_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::fs("read", &path, e)),
        }
    }

    /// Rewrites both state files via write-temp-then-rename.
    pub fn record_success(&self, anchor: DateTime<Utc>, last: &LastBackup) -> Result<()> {
        let json = serde_json::to_vec_pretty(last)?;
        write_atomic(&self.dir.join(LAST_BACKUP_FILE), &json)?;
        write_atomic(
            &self.dir.join(ANCHOR_FILE),
            format_timestamp(anchor).as_bytes(),
        )?;
        Ok(())
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
