// farmdb-backup/src/backup/db_dump.rs
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::BackupMode;
use crate::db::postgres::partial_path;
use crate::db::{DbConnector, DumpFormat, DumpRequest, IncrementalScan};
use crate::errors::{AppError, Result};

use super::state::format_timestamp;

/// File name of the primary artifact before compression.
pub fn primary_file_name(mode: BackupMode, format: DumpFormat, run_id: &str) -> String {
    match (mode, format) {
        (BackupMode::Incremental, _) => format!("incremental_{}.sql", run_id),
        (BackupMode::Full, DumpFormat::Custom) => format!("full_{}.dump", run_id),
        (BackupMode::Full, DumpFormat::Plain) => format!("full_{}.sql", run_id),
    }
}

pub fn schema_file_name(schema: &str, run_id: &str) -> String {
    format!("schema_{}_{}.sql", schema, run_id)
}

pub fn globals_file_name(run_id: &str) -> String {
    format!("globals_{}.sql", run_id)
}

/// Full dump of the target database (or one schema) into `dest`.
pub async fn dump_full<D: DbConnector>(
    db: &D,
    format: DumpFormat,
    schema: Option<&str>,
    dest: &Path,
) -> Result<()> {
    let request = DumpRequest::Database {
        format,
        schema: schema.map(str::to_string),
    };
    db.run_dump(&request, dest).await
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalSummary {
    /// Tables that contributed at least one changed row.
    pub tables_with_changes: usize,
    pub tables_scanned: usize,
    pub bytes: u64,
}

/// Writes rows modified after `since` as `COPY ... FROM stdin` blocks between
/// `BEGIN;` and `COMMIT;`. With no candidates the file holds only the markers.
pub async fn write_incremental<D: DbConnector>(
    db: &D,
    scan: &IncrementalScan,
    since: DateTime<Utc>,
    dest: &Path,
) -> Result<IncrementalSummary> {
    let partial = partial_path(dest);
    match write_incremental_into(db, scan, since, &partial).await {
        Ok(summary) => {
            std::fs::rename(&partial, dest)
                .map_err(|e| AppError::fs("move incremental dump into", dest, e))?;
            Ok(summary)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

async fn write_incremental_into<D: DbConnector>(
    db: &D,
    scan: &IncrementalScan,
    since: DateTime<Utc>,
    path: &Path,
) -> Result<IncrementalSummary> {
    let io_err = |e: io::Error| AppError::fs("write", path, e);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    // Each table's rows land here first and are then copied into the dump.
    let scratch = tempfile::Builder::new()
        .prefix(".rows-")
        .tempfile_in(dir)
        .map_err(|e| AppError::fs("create scratch file in", dir, e))?;
    let scratch_err = |e: io::Error| AppError::fs("read", scratch.path(), e);

    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    let mut summary = IncrementalSummary {
        tables_scanned: scan.candidates.len(),
        ..IncrementalSummary::default()
    };

    writeln!(out, "-- Incremental backup: rows modified after {}", format_timestamp(since)).map_err(io_err)?;
    writeln!(out, "BEGIN;").map_err(io_err)?;

    for table in &scan.candidates {
        let exported = db.export_changed_rows(table, since, scratch.path()).await?;
        if exported == 0 {
            continue;
        }
        tracing::debug!(table = %table.qualified_name(), bytes = exported, "exported changed rows");
        writeln!(out).map_err(io_err)?;
        writeln!(out, "COPY {} FROM stdin;", table.qualified_name()).map_err(io_err)?;
        let mut rows = File::open(scratch.path()).map_err(scratch_err)?;
        io::copy(&mut rows, &mut out).map_err(io_err)?;
        if !ends_with_newline(&mut rows).map_err(scratch_err)? {
            writeln!(out).map_err(io_err)?;
        }
        writeln!(out, "\\.").map_err(io_err)?;
        summary.tables_with_changes += 1;
    }

    writeln!(out, "COMMIT;").map_err(io_err)?;
    out.flush().map_err(io_err)?;
    let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
    file.sync_all().map_err(io_err)?;
    summary.bytes = file.metadata().map_err(io_err)?.len();
    Ok(summary)
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Schema-only dump per schema plus a globals dump, next to the primary artifact.
/// Each failure is logged and skipped; the paths that were written are returned.
pub async fn dump_auxiliaries<D: DbConnector>(db: &D, run_dir: &Path, run_id: &str) -> Vec<PathBuf> {
    let mut written = Vec::new();

    match db.list_schemas().await {
        Ok(schemas) => {
            for schema in schemas {
                let dest = run_dir.join(schema_file_name(&schema, run_id));
                let request = DumpRequest::SchemaOnly { schema: schema.clone() };
                match db.run_dump(&request, &dest).await {
                    Ok(()) => written.push(dest),
                    Err(e) => warn_auxiliary(&format!("schema {}", schema), e),
                }
            }
        }
        Err(e) => warn_auxiliary("schema listing", e),
    }

    let dest = run_dir.join(globals_file_name(run_id));
    match db.run_dump(&DumpRequest::Globals, &dest).await {
        Ok(()) => written.push(dest),
        Err(e) => warn_auxiliary("globals", e),
    }
    written
}

fn warn_auxiliary(what: &str, cause: AppError) {
    let err = AppError::AuxiliaryDumpFailed(format!("{}: {}", what, cause));
    tracing::warn!(kind = err.kind(), "{}", err);
}
