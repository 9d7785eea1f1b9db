// farmdb-backup/src/backup/retention.rs
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
}

/// Run directories directly under `class_dir`, oldest first.
///
/// Run ids are `YYYYMMDD_HHMMSS`, so lexicographic order is chronological.
pub fn list_runs(class_dir: &Path) -> Result<Vec<PathBuf>> {
    if !class_dir.exists() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::new();
    for entry in WalkDir::new(class_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| AppError::fs("list", class_dir, e))?;
        if entry.file_type().is_dir() {
            runs.push(entry.into_path());
        }
    }
    runs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(runs)
}

/// Deletes the oldest run directories so that at most `keep` remain.
///
/// A directory that cannot be removed is logged and counted as kept; the
/// sweep carries on with the next one.
pub fn prune(class_dir: &Path, keep: usize) -> Result<PruneSummary> {
    let runs = list_runs(class_dir)?;
    let excess = runs.len().saturating_sub(keep);
    let mut summary = PruneSummary::default();

    for run in runs.iter().take(excess) {
        match std::fs::remove_dir_all(run) {
            Ok(()) => {
                tracing::info!(path = %run.display(), "Removed expired backup");
                summary.removed.push(run.clone());
            }
            Err(e) => {
                tracing::warn!(path = %run.display(), error = %e, "Could not remove expired backup");
            }
        }
    }
    summary.kept = runs.len() - summary.removed.len();
    Ok(summary)
}
