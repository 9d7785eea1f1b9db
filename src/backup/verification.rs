// farmdb-backup/src/backup/verification.rs
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tempfile::NamedTempFile;

use super::archive::{check_gzip_stream, gunzip_into, is_gzip_path};
use crate::errors::{AppError, Result};
use crate::utils::command::{CommandRunner, CommandSpec};

/// Leading bytes of every pg_dump custom-format archive.
const CUSTOM_ARCHIVE_MAGIC: &[u8] = b"PGDMP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    CustomArchive,
    PlainSql,
}

/// Format of an artifact, judged by its name with any `.gz` suffix removed.
pub fn artifact_format(path: &Path) -> ArtifactFormat {
    let inner = if is_gzip_path(path) {
        path.file_stem().map(Path::new)
    } else {
        path.file_name().map(Path::new)
    };
    match inner.and_then(|p| p.extension()) {
        Some(ext) if ext == "dump" => ArtifactFormat::CustomArchive,
        _ => ArtifactFormat::PlainSql,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub format: ArtifactFormat,
    pub compressed: bool,
    /// Decompressed size when the artifact is gzipped.
    pub uncompressed_bytes: Option<u64>,
    /// Entries listed by `pg_restore --list` for custom archives.
    pub toc_entries: Option<usize>,
}

/// Non-destructive integrity check of a backup artifact.
///
/// Gzip streams must decode end to end; custom archives must carry the
/// archive magic and have a table of contents `pg_restore` can read; plain
/// SQL must not be empty. Nothing is written outside a temporary file that
/// is removed before returning.
pub async fn verify_artifact<R: CommandRunner>(path: &Path, runner: &R) -> Result<VerificationReport> {
    if !path.is_file() {
        return Err(AppError::VerificationFailed(format!(
            "artifact not found: {}",
            path.display()
        )));
    }

    let compressed = is_gzip_path(path);
    let format = artifact_format(path);
    let uncompressed_bytes = if compressed {
        Some(check_gzip_stream(path)?)
    } else {
        None
    };

    let toc_entries = match format {
        ArtifactFormat::CustomArchive => Some(verify_custom_archive(path, compressed, runner).await?),
        ArtifactFormat::PlainSql => {
            let size = match uncompressed_bytes {
                Some(size) => size,
                None => std::fs::metadata(path)
                    .map_err(|e| AppError::fs("stat", path, e))?
                    .len(),
            };
            if size == 0 {
                return Err(AppError::VerificationFailed(format!(
                    "{} is empty",
                    path.display()
                )));
            }
            None
        }
    };

    Ok(VerificationReport {
        format,
        compressed,
        uncompressed_bytes,
        toc_entries,
    })
}

async fn verify_custom_archive<R: CommandRunner>(
    path: &Path,
    compressed: bool,
    runner: &R,
) -> Result<usize> {
    // Keep the temp file alive until pg_restore has read it.
    let scratch = if compressed {
        let tmp = NamedTempFile::new()
            .map_err(|e| AppError::Filesystem(format!("create scratch file: {}", e)))?;
        gunzip_into(path, tmp.as_file())?;
        Some(tmp)
    } else {
        None
    };
    let archive = scratch.as_ref().map(|t| t.path()).unwrap_or(path);

    let mut magic = [0u8; 5];
    let has_magic = File::open(archive)
        .and_then(|mut f| f.read_exact(&mut magic))
        .is_ok()
        && magic == CUSTOM_ARCHIVE_MAGIC;
    if !has_magic {
        return Err(AppError::VerificationFailed(format!(
            "{} is not a pg_dump custom-format archive",
            path.display()
        )));
    }

    let spec = CommandSpec::new("pg_restore")
        .arg("--list")
        .stdin_from(archive)
        .in_container();
    let output = runner
        .run(&spec)
        .await
        .map_err(|e| AppError::VerificationFailed(format!("pg_restore unavailable: {}", e)))?;
    if !output.success() {
        return Err(AppError::VerificationFailed(format!(
            "table of contents of {} is unreadable ({})",
            path.display(),
            output.failure_summary()
        )));
    }

    Ok(output
        .stdout_text()
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with(';'))
        .count())
}
