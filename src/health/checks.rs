// farmdb-backup/src/health/checks.rs
use serde::Serialize;
use std::fmt;

use crate::config::Thresholds;
use crate::errors::{EXIT_DEGRADED, EXIT_FAILURE, EXIT_OK};

pub const CONNECTIVITY: &str = "database";
pub const POOLER: &str = "pgbouncer";
pub const CONNECTION_COUNT: &str = "connection_count";
pub const LONG_RUNNING_QUERIES: &str = "long_running_queries";
pub const DISK_SPACE: &str = "disk_space";
pub const REPLICATION: &str = "replication";

/// Long-running query counts above this are critical.
const LONG_QUERY_CRITICAL_COUNT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Healthy,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Healthy => "healthy",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Severity::Healthy => EXIT_OK,
            Severity::Warning => EXIT_DEGRADED,
            Severity::Critical => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percent of `used` over `total`. Zero when `total` is zero.
pub fn percent(used: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    used as f64 * 100.0 / total as f64
}

/// One decimal place, for reporting only.
pub fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn classify_percent(value: f64, warning: u8, critical: u8) -> Severity {
    if value >= f64::from(critical) {
        Severity::Critical
    } else if value >= f64::from(warning) {
        Severity::Warning
    } else {
        Severity::Healthy
    }
}

pub fn classify_long_queries(count: i64) -> Severity {
    match count {
        c if c > LONG_QUERY_CRITICAL_COUNT => Severity::Critical,
        c if c >= 1 => Severity::Warning,
        _ => Severity::Healthy,
    }
}

/// Zero standbys is a warning; otherwise the worst replay lag decides.
pub fn classify_replication(standbys: i64, max_lag_seconds: Option<f64>, t: &Thresholds) -> Severity {
    if standbys == 0 {
        return Severity::Warning;
    }
    match max_lag_seconds {
        Some(lag) if lag > t.replication_lag_critical_secs => Severity::Critical,
        Some(lag) if lag > t.replication_lag_warning_secs => Severity::Warning,
        _ => Severity::Healthy,
    }
}
