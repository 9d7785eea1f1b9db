// farmdb-backup/src/health/report.rs
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

use super::checks::Severity;

const RESET: &str = "\x1b[0m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const BOLD: &str = "\x1b[1m";

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub status: Severity,
    pub checks: BTreeMap<String, Severity>,
    pub metrics: BTreeMap<String, Value>,
    /// One-line explanation per check, shown in the text report only.
    #[serde(skip)]
    pub details: BTreeMap<String, String>,
}

fn serialize_timestamp<S: serde::Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl HealthReport {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            status: Severity::Healthy,
            checks: BTreeMap::new(),
            metrics: BTreeMap::new(),
            details: BTreeMap::new(),
        }
    }

    /// Records a check; the overall status is the worst seen so far.
    pub fn record(&mut self, name: &str, severity: Severity, detail: impl Into<String>) {
        self.checks.insert(name.to_string(), severity);
        self.details.insert(name.to_string(), detail.into());
        self.status = self.status.max(severity);
    }

    pub fn metric(&mut self, name: &str, value: impl Into<Value>) {
        self.metrics.insert(name.to_string(), value.into());
    }

    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self, color: bool) -> String {
        let paint = |severity: Severity, text: &str| -> String {
            if !color {
                return text.to_string();
            }
            let code = match severity {
                Severity::Healthy => GREEN,
                Severity::Warning => YELLOW,
                Severity::Critical => RED,
            };
            format!("{}{}{}", code, text, RESET)
        };

        let mut out = String::new();
        let title = format!(
            "Database health: {}",
            self.status.as_str().to_uppercase()
        );
        let title = if color {
            format!("{}{}{}", BOLD, paint(self.status, &title), RESET)
        } else {
            title
        };
        let _ = writeln!(out, "{}", title);
        let _ = writeln!(
            out,
            "Checked at {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        let _ = writeln!(out, "\nChecks:");
        for (name, severity) in &self.checks {
            let tag = paint(*severity, &format!("[{:<8}]", severity.as_str()));
            let detail = self.details.get(name).map(String::as_str).unwrap_or("");
            let _ = writeln!(out, "  {} {:<22} {}", tag, name, detail);
        }

        if !self.metrics.is_empty() {
            let _ = writeln!(out, "\nMetrics:");
            for (name, value) in &self.metrics {
                let shown = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let _ = writeln!(out, "  {:<28} {}", name, shown);
            }
        }
        out
    }
}
