// farmdb-backup/src/backup/logic.rs
use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::archive::{gzip_file, is_gzip_path, CompressionStats};
use super::db_dump::{dump_auxiliaries, dump_full, primary_file_name, write_incremental};
use super::hooks::{HookRunner, Outcome};
use super::metadata::{
    BackupFileInfo, BackupInfo, BackupMetadata, ConnectionInfo, DatabaseInfo, SystemInfo,
};
use super::retention::{prune, PruneSummary};
use super::state::{format_timestamp, LastBackup, StateStore};
use super::verification::{verify_artifact, VerificationReport};
use crate::config::{BackupClass, BackupConfig, BackupMode, ConnectionKind};
use crate::db::{DbConnector, DumpFormat};
use crate::errors::AppError;
use crate::utils::command::CommandRunner;
use crate::utils::{file_size, format_size, sha256_file};

/// Stage of a run, named in the summary line when the run fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Preflight,
    Initialize,
    Dump,
    Verify,
    Metadata,
    State,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Preflight => "preflight",
            Step::Initialize => "initialize",
            Step::Dump => "dump",
            Step::Verify => "verify",
            Step::Metadata => "metadata",
            Step::State => "state update",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct RunFailure {
    pub step: Step,
    pub error: AppError,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} step failed ({}): {}", self.step, self.error.kind(), self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

fn at(step: Step) -> impl FnOnce(AppError) -> RunFailure {
    move |error| RunFailure { step, error }
}

/// One scheduled execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRun {
    pub run_id: String,
    pub class: BackupClass,
    /// Mode as requested; an incremental run without an anchor runs as full.
    pub mode: BackupMode,
    pub schema_filter: Option<String>,
    pub connection_kind: ConnectionKind,
    pub compress: bool,
    pub started_at: DateTime<Utc>,
}

impl BackupRun {
    pub fn new(config: &BackupConfig, started_at: DateTime<Utc>) -> Self {
        let started_at = started_at.trunc_subsecs(0);
        Self {
            run_id: started_at.format("%Y%m%d_%H%M%S").to_string(),
            class: config.class,
            mode: config.mode,
            schema_filter: config.schema_filter.clone(),
            connection_kind: config.connection_kind,
            compress: config.compress,
            started_at,
        }
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub run_dir: PathBuf,
    pub path: PathBuf,
    /// Mode actually performed.
    pub mode: BackupMode,
    pub auxiliaries: Vec<PathBuf>,
    pub compression: Vec<CompressionStats>,
    pub verification: VerificationReport,
    pub metadata: BackupMetadata,
    pub retention: Option<PruneSummary>,
}

pub struct BackupEngine<'a, D, R> {
    config: &'a BackupConfig,
    db: &'a D,
    runner: &'a R,
}

impl<'a, D: DbConnector, R: CommandRunner> BackupEngine<'a, D, R> {
    pub fn new(config: &'a BackupConfig, db: &'a D, runner: &'a R) -> Self {
        Self { config, db, runner }
    }

    /// Runs the whole pipeline for `run`, bracketed by the pre and post hooks.
    /// The post hook always runs, with the outcome of the run.
    pub async fn run(&self, run: &BackupRun) -> Result<BackupArtifact, RunFailure> {
        let clock = Instant::now();
        let database = self.config.database.name.as_str();
        tracing::info!(
            run_id = %run.run_id,
            class = %run.class,
            mode = %run.mode,
            connection = %run.connection_kind,
            schema = run.schema_filter.as_deref().unwrap_or("all"),
            "Starting {} {} backup of {}",
            run.class,
            run.mode,
            database
        );

        let hooks = HookRunner::new(&self.config.hooks_dir, self.runner);
        let result = self.execute(run, &hooks).await;

        let outcome = if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        hooks.post(run.class, run.mode, database, outcome).await;

        let elapsed = clock.elapsed().as_secs_f64();
        match &result {
            Ok(artifact) => tracing::info!(
                elapsed_secs = elapsed,
                "Backup completed in {:.1}s: {} ({})",
                elapsed,
                artifact.path.display(),
                artifact.metadata.backup_file.size_human
            ),
            Err(failure) => tracing::error!(
                elapsed_secs = elapsed,
                step = %failure.step,
                kind = failure.error.kind(),
                "Backup failed after {:.1}s at {} step: {}",
                elapsed,
                failure.step,
                failure.error
            ),
        }
        result
    }

    async fn execute(
        &self,
        run: &BackupRun,
        hooks: &HookRunner<'_, R>,
    ) -> Result<BackupArtifact, RunFailure> {
        self.db.ping().await.map_err(at(Step::Preflight))?;
        tracing::info!(endpoint = %self.config.active_endpoint(), "Database is reachable");

        let class_dir = std::path::absolute(self.config.class_dir(run.class))
            .map_err(|e| AppError::fs("resolve", &self.config.class_dir(run.class), e))
            .map_err(at(Step::Initialize))?;
        let run_dir = class_dir.join(&run.run_id);
        std::fs::create_dir_all(&run_dir)
            .map_err(|e| AppError::fs("create run directory", &run_dir, e))
            .map_err(at(Step::Initialize))?;

        hooks
            .pre(run.class, run.mode, &self.config.database.name)
            .await;

        let state = StateStore::new(self.config.state_dir());
        match state.read_last_backup() {
            Ok(Some(previous)) => tracing::info!(
                run_id = %previous.run_id,
                class = %previous.class,
                mode = %previous.mode,
                "Previous successful backup: {}",
                previous.path.display()
            ),
            Ok(None) => tracing::info!("No previous successful backup recorded"),
            Err(e) => tracing::warn!(error = %e, "Could not read the last backup record"),
        }
        let (mode, primary) = self.dump_primary(run, &run_dir, &state).await?;

        let mut auxiliaries = Vec::new();
        if run.class.wants_auxiliary_dumps() && run.schema_filter.is_none() {
            tracing::info!("Writing per-schema and globals dumps");
            auxiliaries = dump_auxiliaries(self.db, &run_dir, &run.run_id).await;
        }

        let mut compression = Vec::new();
        let primary = if run.compress {
            let primary = compress_or_keep(&primary, &mut compression);
            auxiliaries = auxiliaries
                .iter()
                .map(|aux| compress_or_keep(aux, &mut compression))
                .collect();
            primary
        } else {
            primary
        };

        let verification = verify_artifact(&primary, self.runner)
            .await
            .map_err(at(Step::Verify))?;
        tracing::info!(
            path = %primary.display(),
            toc_entries = ?verification.toc_entries,
            "Verified backup artifact"
        );

        let metadata = self
            .build_metadata(run, mode, &primary)
            .await
            .map_err(at(Step::Metadata))?;
        metadata.write(&run_dir).map_err(at(Step::Metadata))?;

        let last = LastBackup {
            class: run.class,
            mode,
            run_id: run.run_id.clone(),
            timestamp: metadata.backup_info.timestamp.clone(),
            path: primary.clone(),
            size_bytes: metadata.backup_file.size_bytes,
            sha256: metadata.backup_file.sha256.clone(),
            compressed: metadata.backup_file.compressed,
        };
        state
            .record_success(run.started_at, &last)
            .map_err(at(Step::State))?;
        tracing::info!(
            anchor = %format_timestamp(run.started_at),
            state_dir = %state.dir().display(),
            "Advanced incremental anchor"
        );

        let keep = self.config.retention.keep(run.class);
        let retention = match prune(&class_dir, keep) {
            Ok(summary) => {
                tracing::info!(
                    class = %run.class,
                    removed = summary.removed.len(),
                    kept = summary.kept,
                    "Applied retention (keep {})",
                    keep
                );
                Some(summary)
            }
            Err(e) => {
                tracing::warn!(class = %run.class, error = %e, "Retention sweep failed");
                None
            }
        };

        Ok(BackupArtifact {
            run_dir,
            path: primary,
            mode,
            auxiliaries,
            compression,
            verification,
            metadata,
            retention,
        })
    }

    /// Writes the primary artifact and returns the mode actually performed.
    async fn dump_primary(
        &self,
        run: &BackupRun,
        run_dir: &Path,
        state: &StateStore,
    ) -> Result<(BackupMode, PathBuf), RunFailure> {
        let schema = run.schema_filter.as_deref();

        if run.mode == BackupMode::Incremental {
            match state.read_anchor().map_err(at(Step::Dump))? {
                Some(anchor) => {
                    let dest = run_dir.join(primary_file_name(
                        BackupMode::Incremental,
                        DumpFormat::Plain,
                        &run.run_id,
                    ));
                    let scan = self
                        .db
                        .incremental_scan(schema)
                        .await
                        .map_err(|e| AppError::DumpFailed(format!("table discovery failed: {}", e)))
                        .map_err(at(Step::Dump))?;
                    if !scan.skipped.is_empty() {
                        tracing::info!(
                            "Skipping {} tables without a timestamp column: {}",
                            scan.skipped.len(),
                            scan.skipped.join(", ")
                        );
                    }
                    let summary = write_incremental(self.db, &scan, anchor, &dest)
                        .await
                        .map_err(at(Step::Dump))?;
                    tracing::info!(
                        since = %format_timestamp(anchor),
                        tables = summary.tables_scanned,
                        changed = summary.tables_with_changes,
                        bytes = summary.bytes,
                        "Wrote incremental dump {}",
                        dest.display()
                    );
                    return Ok((BackupMode::Incremental, dest));
                }
                None => {
                    tracing::info!("No incremental anchor found; running a full backup instead");
                }
            }
        }

        let format = match run.connection_kind {
            ConnectionKind::Direct => DumpFormat::Custom,
            ConnectionKind::Pooled => {
                tracing::warn!("Custom dump format is unavailable through the pooler; writing plain SQL");
                DumpFormat::Plain
            }
        };
        let dest = run_dir.join(primary_file_name(BackupMode::Full, format, &run.run_id));
        dump_full(self.db, format, schema, &dest)
            .await
            .map_err(at(Step::Dump))?;
        tracing::info!(path = %dest.display(), "Wrote full dump");
        Ok((BackupMode::Full, dest))
    }

    async fn build_metadata(
        &self,
        run: &BackupRun,
        mode: BackupMode,
        primary: &Path,
    ) -> crate::errors::Result<BackupMetadata> {
        let version = self.db.server_version().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read server version");
            "unknown".to_string()
        });
        let size = self
            .db
            .database_size(run.schema_filter.as_deref())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Could not read database size");
                "unknown".to_string()
            });

        let size_bytes = file_size(primary)?;
        let settings = &self.config.database;
        Ok(BackupMetadata {
            backup_info: BackupInfo {
                class: run.class,
                mode,
                run_id: run.run_id.clone(),
                timestamp: format_timestamp(run.started_at),
            },
            database: DatabaseInfo {
                name: settings.name.clone(),
                user: settings.user.clone(),
                host: settings.host.clone(),
                port: settings.port,
                schema: run.schema_filter.clone().unwrap_or_else(|| "all".to_string()),
                version,
                size,
            },
            backup_file: BackupFileInfo {
                filename: primary
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: primary.to_path_buf(),
                size_bytes,
                size_human: format_size(size_bytes),
                sha256: sha256_file(primary)?,
                compressed: is_gzip_path(primary),
            },
            connection: ConnectionInfo {
                pooled: run.connection_kind == ConnectionKind::Pooled,
                endpoint: self.config.active_endpoint().to_string(),
            },
            system: SystemInfo::current(),
        })
    }
}

/// Gzips `path`; on failure logs a warning and keeps the uncompressed file.
fn compress_or_keep(path: &Path, stats: &mut Vec<CompressionStats>) -> PathBuf {
    match gzip_file(path) {
        Ok(done) => {
            tracing::info!(
                original = done.original_bytes,
                compressed = done.compressed_bytes,
                "Compressed {}: {} -> {} ({:.1}% saved)",
                path.display(),
                format_size(done.original_bytes),
                format_size(done.compressed_bytes),
                done.savings_percent()
            );
            let out = done.path.clone();
            stats.push(done);
            out
        }
        Err(e) => {
            tracing::warn!(kind = e.kind(), "{}; keeping uncompressed artifact", e);
            path.to_path_buf()
        }
    }
}
