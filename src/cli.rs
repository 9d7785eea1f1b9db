// farmdb-backup/src/cli.rs
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{BackupClass, BackupMode, ConnectionKind};

#[derive(Debug, Parser)]
#[command(
    name = "farmdb-backup",
    version,
    about = "PostgreSQL backups with retention, plus a database health probe",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Take a full or incremental backup, or verify an existing artifact
    Backup(BackupArgs),
    /// Probe database health; exits 0 (healthy), 1 (warning) or 2 (critical)
    Health(HealthArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct BackupArgs {
    /// Retention bucket the run belongs to
    #[arg(short = 't', long = "class", value_enum, default_value_t = BackupClass::Daily)]
    pub class: BackupClass,

    /// Full dump or rows changed since the last successful run
    #[arg(short, long, value_enum, default_value_t = BackupMode::Full)]
    pub mode: BackupMode,

    /// Restrict the dump to a single schema
    #[arg(short, long)]
    pub schema: Option<String>,

    /// Override the configured target database
    #[arg(short, long)]
    pub database: Option<String>,

    /// Connect directly or through the connection pooler
    #[arg(short, long, value_enum, default_value_t = ConnectionKind::Direct)]
    pub connection: ConnectionKind,

    /// Gzip the produced artifacts
    #[arg(long, value_enum, default_value_t = Toggle::On)]
    pub compress: Toggle,

    /// Only verify an existing artifact, touching nothing else
    #[arg(long, value_name = "PATH")]
    pub verify_only: Option<PathBuf>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct HealthArgs {
    /// Direct database host
    #[arg(long)]
    pub host: Option<String>,

    /// Direct database port
    #[arg(long)]
    pub port: Option<u16>,

    /// Connection pooler host
    #[arg(long)]
    pub pgbouncer_host: Option<String>,

    /// Connection pooler port
    #[arg(long)]
    pub pgbouncer_port: Option<u16>,

    /// Also check streaming replication when the server is a primary
    #[arg(long)]
    pub check_replication: bool,

    #[arg(long, default_value_t = 80)]
    pub disk_warning: u8,

    #[arg(long, default_value_t = 90)]
    pub disk_critical: u8,

    #[arg(long = "conn-warning", default_value_t = 80)]
    pub connection_warning: u8,

    #[arg(long = "conn-critical", default_value_t = 95)]
    pub connection_critical: u8,

    /// Sessions active longer than this many seconds count as long-running
    #[arg(long, default_value_t = 30)]
    pub long_query_seconds: u64,

    /// Emit a single JSON object instead of the text summary
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_defaults() {
        let cli = Cli::try_parse_from(["farmdb-backup", "backup"]).unwrap();
        let Command::Backup(args) = cli.command else {
            panic!("expected backup subcommand");
        };
        assert_eq!(args.class, BackupClass::Daily);
        assert_eq!(args.mode, BackupMode::Full);
        assert_eq!(args.connection, ConnectionKind::Direct);
        assert!(args.compress.enabled());
        assert!(args.verify_only.is_none());
    }

    #[test]
    fn backup_flags_parse() {
        let cli = Cli::try_parse_from([
            "farmdb-backup", "backup", "--class", "weekly", "--mode", "incremental",
            "--schema", "public", "--connection", "pooled", "--compress", "off",
        ])
        .unwrap();
        let Command::Backup(args) = cli.command else {
            panic!("expected backup subcommand");
        };
        assert_eq!(args.class, BackupClass::Weekly);
        assert_eq!(args.mode, BackupMode::Incremental);
        assert_eq!(args.schema.as_deref(), Some("public"));
        assert_eq!(args.connection, ConnectionKind::Pooled);
        assert!(!args.compress.enabled());
    }

    #[test]
    fn invalid_class_is_rejected() {
        let err = Cli::try_parse_from(["farmdb-backup", "backup", "--class", "hourly"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn health_defaults() {
        let cli = Cli::try_parse_from(["farmdb-backup", "health", "--json"]).unwrap();
        let Command::Health(args) = cli.command else {
            panic!("expected health subcommand");
        };
        assert!(args.json);
        assert_eq!(args.disk_warning, 80);
        assert_eq!(args.disk_critical, 90);
        assert_eq!(args.connection_warning, 80);
        assert_eq!(args.connection_critical, 95);
        assert_eq!(args.long_query_seconds, 30);
        assert!(!args.check_replication);
    }
}
