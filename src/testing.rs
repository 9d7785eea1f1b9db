//! Scripted doubles for the database connector and the command runner.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::db::{DbConnector, DumpFormat, DumpRequest, IncrementalScan, TimestampedTable};
use crate::errors::{AppError, Result};
use crate::utils::command::{CommandOutput, CommandRunner, CommandSpec};

/// Bytes a custom-format archive starts with.
pub const CUSTOM_ARCHIVE: &[u8] = b"PGDMP\x01\x0e\x00 fake custom archive body";

#[derive(Default)]
pub struct FakeRunner {
    stdout: HashMap<String, Vec<u8>>,
    failures: HashMap<String, (i32, String)>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    /// Canned stdout for every invocation of `program`; written to the
    /// command's stdout file when one is set.
    pub fn with_stdout(mut self, program: &str, bytes: Vec<u8>) -> Self {
        self.stdout.insert(program.to_string(), bytes);
        self
    }

    pub fn with_failure(mut self, program: &str, code: i32, stderr: &str) -> Self {
        self.failures
            .insert(program.to_string(), (code, stderr.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program || c.program.ends_with(&format!("/{}", program)))
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        let program = Path::new(&spec.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some((code, stderr)) = self.failures.get(&program) {
            return Ok(CommandOutput {
                code: Some(*code),
                stdout: Vec::new(),
                stderr: stderr.clone(),
            });
        }

        let bytes = self.stdout.get(&program).cloned().unwrap_or_default();
        let stdout = match &spec.stdout_to {
            Some(path) => {
                std::fs::write(path, &bytes).map_err(|e| AppError::fs("write", path, e))?;
                Vec::new()
            }
            None => bytes,
        };
        Ok(CommandOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// In-memory database: dumps are canned byte strings written to disk.
pub struct FakeConnector {
    pub reachable: bool,
    pub version: String,
    pub size: String,
    pub schemas: Vec<String>,
    pub scan: IncrementalScan,
    pub changed_rows: HashMap<String, Vec<u8>>,
    pub fail_requests: HashSet<String>,
    dumps: Mutex<Vec<(DumpRequest, PathBuf)>>,
    exports: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self {
            reachable: true,
            version: "16.4".to_string(),
            size: "42 MB".to_string(),
            schemas: vec!["public".to_string(), "sensors".to_string()],
            scan: IncrementalScan::default(),
            changed_rows: HashMap::new(),
            fail_requests: HashSet::new(),
            dumps: Mutex::new(Vec::new()),
            exports: Mutex::new(Vec::new()),
        }
    }
}

impl FakeConnector {
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::default()
        }
    }

    /// Fails dumps whose label matches: `custom`, `plain`, `schema:<name>` or `globals`.
    pub fn failing(mut self, label: &str) -> Self {
        self.fail_requests.insert(label.to_string());
        self
    }

    pub fn dumps(&self) -> Vec<(DumpRequest, PathBuf)> {
        self.dumps.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn exports(&self) -> Vec<(String, DateTime<Utc>)> {
        self.exports.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

fn request_label(request: &DumpRequest) -> String {
    match request {
        DumpRequest::Database { format: DumpFormat::Custom, .. } => "custom".to_string(),
        DumpRequest::Database { format: DumpFormat::Plain, .. } => "plain".to_string(),
        DumpRequest::SchemaOnly { schema } => format!("schema:{}", schema),
        DumpRequest::Globals => "globals".to_string(),
    }
}

impl DbConnector for FakeConnector {
    async fn ping(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(AppError::Unreachable("fake:5432 refused connection".to_string()))
        }
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    async fn database_size(&self, _schema: Option<&str>) -> Result<String> {
        Ok(self.size.clone())
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        Ok(self.schemas.clone())
    }

    async fn incremental_scan(&self, _schema: Option<&str>) -> Result<IncrementalScan> {
        Ok(self.scan.clone())
    }

    async fn run_dump(&self, request: &DumpRequest, dest: &Path) -> Result<()> {
        if let Ok(mut dumps) = self.dumps.lock() {
            dumps.push((request.clone(), dest.to_path_buf()));
        }
        let label = request_label(request);
        if self.fail_requests.contains(&label) {
            return Err(AppError::DumpFailed(format!("{} dump refused", label)));
        }
        let body: Vec<u8> = match request {
            DumpRequest::Database { format: DumpFormat::Custom, .. } => CUSTOM_ARCHIVE.to_vec(),
            DumpRequest::Database { format: DumpFormat::Plain, .. } => {
                b"-- PostgreSQL database dump\nCREATE TABLE fields (id int);\n".to_vec()
            }
            DumpRequest::SchemaOnly { schema } => format!("CREATE SCHEMA {};\n", schema).into_bytes(),
            DumpRequest::Globals => b"CREATE ROLE agri;\n".to_vec(),
        };
        std::fs::write(dest, body).map_err(|e| AppError::fs("write", dest, e))
    }

    async fn export_changed_rows(
        &self,
        table: &TimestampedTable,
        since: DateTime<Utc>,
        dest: &Path,
    ) -> Result<u64> {
        let name = format!("{}.{}", table.schema, table.table);
        if let Ok(mut exports) = self.exports.lock() {
            exports.push((name.clone(), since));
        }
        let rows = self.changed_rows.get(&name).cloned().unwrap_or_default();
        std::fs::write(dest, &rows).map_err(|e| AppError::fs("write", dest, e))?;
        Ok(rows.len() as u64)
    }
}

/// Collects formatted log lines from futures run under [`CapturedLogs::subscriber`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut b) = self.0.lock() {
            b.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
