//! Database health probe.
//!
//! Each check runs independently under the configured timeout. A check that
//! errors is reported as a warning and never stops the others; the overall
//! status is the worst check status and maps directly to the exit code.

pub(crate) mod checks;
pub(crate) mod report;
pub(crate) mod source;

use chrono::Utc;
use std::future::Future;
use std::io::IsTerminal;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::{ConnectionKind, HealthConfig, Thresholds};
use crate::db::PgConnector;
use crate::errors::{AppError, Result};
use crate::utils::command::SystemCommandRunner;

use checks::{
    classify_long_queries, classify_percent, classify_replication, percent, round_tenth, Severity,
    CONNECTION_COUNT, CONNECTIVITY, DISK_SPACE, LONG_RUNNING_QUERIES, POOLER, REPLICATION,
};
pub use report::HealthReport;
use source::{HealthSource, ReplicationStatus};

/// Probe options that do not depend on where the statistics come from.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub thresholds: Thresholds,
    pub check_replication: bool,
    pub check_timeout: Duration,
}

impl From<&HealthConfig> for ProbeOptions {
    fn from(config: &HealthConfig) -> Self {
        Self {
            thresholds: config.thresholds,
            check_replication: config.check_replication,
            check_timeout: config.check_timeout,
        }
    }
}

/// Runs the probe against the configured server, prints the report and
/// returns the exit code.
pub async fn run_health_flow(config: &HealthConfig) -> anyhow::Result<u8> {
    let runner = SystemCommandRunner::new(config.container.clone());
    let connector = PgConnector::new(
        &config.database,
        ConnectionKind::Direct,
        &config.pooler,
        runner,
    );
    tracing::info!(endpoint = %connector.endpoint(), pooler = %config.pooler, "Probing database health");
    let report = probe(&connector, &ProbeOptions::from(config)).await;

    if config.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text(std::io::stdout().is_terminal()));
    }
    tracing::info!(status = %report.status, "Health probe finished");
    Ok(report.exit_code())
}

async fn bounded<T>(limit: Duration, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::HealthCheck(format!(
            "{} timed out after {}s",
            what,
            limit.as_secs()
        ))),
    }
}

fn check_failed(report: &mut HealthReport, name: &str, err: AppError) {
    tracing::warn!(check = name, kind = err.kind(), error = %err, "Health check could not complete");
    report.record(name, Severity::Warning, format!("check failed: {}", err));
}

pub async fn probe<S: HealthSource>(source: &S, options: &ProbeOptions) -> HealthReport {
    let mut report = HealthReport::new(Utc::now());
    let limit = options.check_timeout;
    let t = &options.thresholds;

    let reachable = match bounded(limit, "connectivity", source.ping()).await {
        Ok(()) => {
            report.record(CONNECTIVITY, Severity::Healthy, "accepting connections");
            true
        }
        Err(e) => {
            report.record(CONNECTIVITY, Severity::Critical, format!("unreachable: {}", e));
            false
        }
    };

    match bounded(limit, "pooler", source.active_pools()).await {
        Ok(pools) => {
            report.record(POOLER, Severity::Healthy, format!("{} pools", pools));
            report.metric("active_pools", pools);
        }
        Err(e) => check_failed(&mut report, POOLER, e),
    }

    if !reachable {
        let mut skipped = vec![CONNECTION_COUNT, LONG_RUNNING_QUERIES, DISK_SPACE];
        if options.check_replication {
            skipped.push(REPLICATION);
        }
        for name in skipped {
            report.record(name, Severity::Warning, "server unreachable");
        }
        return report;
    }

    if let Ok(version) = bounded(limit, "version", source.server_version()).await {
        report.metric("server_version", version);
    }

    match bounded(limit, "connections", source.connection_usage()).await {
        Ok((active, max)) => {
            let pct = percent(active, max);
            let severity = classify_percent(pct, t.connection_warning, t.connection_critical);
            report.record(
                CONNECTION_COUNT,
                severity,
                format!("{} of {} connections ({:.1}%)", active, max, pct),
            );
            report.metric("active_connections", active);
            report.metric("max_connections", max);
            report.metric("connection_percent", round_tenth(pct));
        }
        Err(e) => check_failed(&mut report, CONNECTION_COUNT, e),
    }

    match bounded(
        limit,
        "long queries",
        source.long_running_queries(t.long_query_seconds),
    )
    .await
    {
        Ok(count) => {
            report.record(
                LONG_RUNNING_QUERIES,
                classify_long_queries(count),
                format!("{} queries running longer than {}s", count, t.long_query_seconds),
            );
            report.metric("long_running_queries", count);
        }
        Err(e) => check_failed(&mut report, LONG_RUNNING_QUERIES, e),
    }

    match bounded(limit, "disk", source.disk_usage_percent()).await {
        Ok(used) => {
            report.record(
                DISK_SPACE,
                classify_percent(f64::from(used), t.disk_warning, t.disk_critical),
                format!("{}% used", used),
            );
            report.metric("disk_usage_percent", used);
        }
        Err(e) => check_failed(&mut report, DISK_SPACE, e),
    }

    if options.check_replication {
        match bounded(limit, "replication", source.replication()).await {
            Ok(ReplicationStatus::Standby) => {
                report.metric("replication_role", "standby");
            }
            Ok(ReplicationStatus::Primary {
                standbys,
                max_lag_seconds,
            }) => {
                let severity = classify_replication(standbys, max_lag_seconds, t);
                let detail = match max_lag_seconds {
                    Some(lag) => format!("{} standbys, max lag {:.1}s", standbys, lag),
                    None => format!("{} standbys", standbys),
                };
                report.record(REPLICATION, severity, detail);
                report.metric("replication_role", "primary");
                report.metric("replication_standbys", standbys);
                if let Some(lag) = max_lag_seconds {
                    report.metric("replication_max_lag_seconds", lag);
                }
            }
            Err(e) => check_failed(&mut report, REPLICATION, e),
        }
    }

    match bounded(limit, "size", source.database_size()).await {
        Ok(size) => report.metric("database_size", size),
        Err(e) => tracing::warn!(error = %e, "Could not read database size"),
    }

    report
}
