mod logic;
pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod hooks;
pub(crate) mod metadata;
pub(crate) mod retention;
pub(crate) mod state;
pub(crate) mod verification;

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use crate::config::BackupConfig;
use crate::db::PgConnector;
use crate::errors::AppError;
use crate::utils::command::{CommandRunner, SystemCommandRunner};
use crate::utils::sha256_file;

pub use logic::{BackupEngine, BackupRun};
use metadata::BackupMetadata;
use verification::{verify_artifact, VerificationReport};

/// Public entry point for the backup process.
pub async fn run_backup_flow(config: &BackupConfig) -> Result<()> {
    let runner = SystemCommandRunner::new(config.container.clone());

    if let Some(path) = &config.verify_only {
        let report = verify_only(path, &runner)
            .await
            .with_context(|| format!("Verification of {} failed", path.display()))?;
        tracing::info!(
            path = %path.display(),
            format = ?report.format,
            compressed = report.compressed,
            uncompressed_bytes = ?report.uncompressed_bytes,
            toc_entries = ?report.toc_entries,
            "Artifact verified"
        );
        return Ok(());
    }

    let connector = PgConnector::new(
        &config.database,
        config.connection_kind,
        &config.pooler,
        runner,
    );
    let run = BackupRun::new(config, Utc::now());
    let engine = BackupEngine::new(config, &connector, connector.runner());
    engine
        .run(&run)
        .await
        .map(|_| ())
        .map_err(|failure| anyhow::Error::new(failure.error).context(format!("{} step failed", failure.step)))
}

/// Checks an existing artifact without writing anything.
///
/// When a sibling `metadata.json` describes this file, its recorded SHA-256
/// must match as well.
pub async fn verify_only<R: CommandRunner>(
    path: &Path,
    runner: &R,
) -> crate::errors::Result<VerificationReport> {
    let report = verify_artifact(path, runner).await?;

    let Some(run_dir) = path.parent() else {
        return Ok(report);
    };
    if !run_dir.join(metadata::METADATA_FILE).is_file() {
        return Ok(report);
    }
    let recorded = BackupMetadata::load(run_dir)?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    if name.as_deref() == Some(recorded.backup_file.filename.as_str()) {
        let actual = sha256_file(path)?;
        if actual != recorded.backup_file.sha256 {
            return Err(AppError::VerificationFailed(format!(
                "checksum of {} is {} but metadata records {}",
                path.display(),
                actual,
                recorded.backup_file.sha256
            )));
        }
        tracing::info!(sha256 = %actual, "Checksum matches metadata");
    }
    Ok(report)
}
