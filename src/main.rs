//! Farm database backup tool
//!
//! Scheduled PostgreSQL backups with retention, and a health probe usable as a
//! readiness check.

// farmdb-backup/src/main.rs
mod backup;
mod cli;
mod config;
mod db;
mod errors;
mod health;
mod logging;
mod utils;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;

use cli::{Cli, Command};
use config::{load_backup_config, load_env_files, load_health_config, RawEnvConfig};
use errors::{exit_code_for, EXIT_FAILURE, EXIT_OK};

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures.
            return ExitCode::from(if e.use_stderr() { EXIT_FAILURE } else { EXIT_OK });
        }
    };

    tokio::select! {
        code = run_app(cli) => match code {
            Ok(code) => ExitCode::from(code),
            Err(e) => {
                tracing::error!("{:#}", e);
                eprintln!("Error: {:#}", e);
                ExitCode::from(exit_code_for(&e))
            }
        },
        signal = shutdown_signal() => {
            tracing::warn!("Received {}; aborting without updating state", signal);
            eprintln!("Interrupted by {}", signal);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run_app(cli: Cli) -> Result<u8> {
    let loaded = load_env_files(
        Path::new(config::PROJECT_ENV_FILE),
        Path::new(config::FALLBACK_ENV_FILE),
    );
    let raw = RawEnvConfig::from_env();

    match cli.command {
        Command::Backup(args) => {
            let backup_config = load_backup_config(&raw, &args)
                .context("Failed to load backup configuration")?;
            if backup_config.verify_only.is_some() {
                logging::init_stderr_logging()?;
            } else {
                let log_file = logging::init_backup_logging(&backup_config.logs_dir(), backup_config.class)?;
                tracing::debug!(log_file = %log_file.display(), "Logging to file");
            }
            for path in &loaded {
                tracing::debug!(path = %path.display(), "Loaded environment file");
            }
            backup::run_backup_flow(&backup_config)
                .await
                .context("Backup process failed")?;
            Ok(EXIT_OK)
        }
        Command::Health(args) => {
            logging::init_stderr_logging()?;
            let health_config = load_health_config(&raw, &args)
                .context("Failed to load health probe configuration")?;
            health::run_health_flow(&health_config)
                .await
                .context("Health probe failed")
        }
    }
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
