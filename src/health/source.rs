// farmdb-backup/src/health/source.rs
use std::path::Path;

use crate::db::{DbConnector, PgConnector};
use crate::errors::{AppError, Result};
use crate::utils::command::{CommandRunner, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplicationStatus {
    Standby,
    Primary {
        standbys: i64,
        /// Largest replay lag across standbys; `None` when none report one.
        max_lag_seconds: Option<f64>,
    },
}

/// Raw statistics the probe classifies.
#[allow(async_fn_in_trait)]
pub trait HealthSource {
    async fn ping(&self) -> Result<()>;
    async fn server_version(&self) -> Result<String>;
    /// Pools listed by the pooler's admin console.
    async fn active_pools(&self) -> Result<usize>;
    /// `(sessions, max_connections)`.
    async fn connection_usage(&self) -> Result<(i64, i64)>;
    async fn long_running_queries(&self, threshold_secs: u64) -> Result<i64>;
    /// Percent used of the filesystem holding the data directory.
    async fn disk_usage_percent(&self) -> Result<u8>;
    async fn replication(&self) -> Result<ReplicationStatus>;
    async fn database_size(&self) -> Result<String>;
}

impl<R: CommandRunner> HealthSource for PgConnector<R> {
    async fn ping(&self) -> Result<()> {
        DbConnector::ping(self).await
    }

    async fn server_version(&self) -> Result<String> {
        DbConnector::server_version(self).await
    }

    async fn active_pools(&self) -> Result<usize> {
        let spec = self
            .cli_spec("psql", &self.pooler, "pgbouncer")
            .args(["-X", "-t", "-A", "-c", "SHOW POOLS"]);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(AppError::HealthCheck(format!(
                "pooler at {} is unavailable ({})",
                self.pooler,
                output.failure_summary()
            )));
        }
        Ok(output
            .stdout_text()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count())
    }

    async fn connection_usage(&self) -> Result<(i64, i64)> {
        let active: i64 = sqlx::query_scalar("SELECT count(*) FROM pg_stat_activity")
            .fetch_one(&self.pool)
            .await?;
        let max: String = sqlx::query_scalar("SHOW max_connections")
            .fetch_one(&self.pool)
            .await?;
        let max = max.trim().parse().map_err(|_| {
            AppError::HealthCheck(format!("unexpected max_connections value '{}'", max))
        })?;
        Ok((active, max))
    }

    async fn long_running_queries(&self, threshold_secs: u64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM pg_stat_activity
              WHERE state = 'active'
                AND pid <> pg_backend_pid()
                AND now() - query_start > make_interval(secs => $1)",
        )
        .bind(threshold_secs as f64)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn disk_usage_percent(&self) -> Result<u8> {
        let data_dir: String = sqlx::query_scalar("SHOW data_directory")
            .fetch_one(&self.pool)
            .await?;
        let spec = CommandSpec::new("df").arg("-P").arg(&data_dir).in_container();
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(AppError::HealthCheck(format!(
                "df failed for {} ({})",
                data_dir,
                output.failure_summary()
            )));
        }
        parse_df_usage(&output.stdout_text()).ok_or_else(|| {
            AppError::HealthCheck(format!(
                "could not read usage of {} from df output",
                Path::new(&data_dir).display()
            ))
        })
    }

    async fn replication(&self) -> Result<ReplicationStatus> {
        let in_recovery: bool = sqlx::query_scalar("SELECT pg_is_in_recovery()")
            .fetch_one(&self.pool)
            .await?;
        if in_recovery {
            return Ok(ReplicationStatus::Standby);
        }
        let (standbys, max_lag_seconds): (i64, Option<f64>) = sqlx::query_as(
            "SELECT count(*), max(EXTRACT(EPOCH FROM replay_lag))::float8 FROM pg_stat_replication",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(ReplicationStatus::Primary {
            standbys,
            max_lag_seconds,
        })
    }

    async fn database_size(&self) -> Result<String> {
        DbConnector::database_size(self, None).await
    }
}

/// Use% column of the last line of `df -P` output.
pub fn parse_df_usage(output: &str) -> Option<u8> {
    let line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    line.split_whitespace()
        .nth(4)?
        .trim_end_matches('%')
        .parse()
        .ok()
}
