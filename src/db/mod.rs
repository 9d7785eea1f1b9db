//! Uniform access to the target database.
//!
//! Queries go through an sqlx pool against the selected endpoint; dumps and
//! row exports go through the PostgreSQL CLIs via a [`CommandRunner`]. Only
//! [`DbConnector::run_dump`] observes whether the endpoint is pooled, since
//! the pooler cannot carry the custom archive format.
//!
//! [`CommandRunner`]: crate::utils::command::CommandRunner

pub mod postgres;

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::errors::Result;

pub use postgres::PgConnector;

/// Columns that mark a row's last modification, in order of preference.
pub const TIMESTAMP_COLUMNS: [&str; 4] = ["updated_at", "modified_at", "last_modified", "updated"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// pg_dump's restorable archive (`--format=custom`).
    Custom,
    /// Ordered SQL statements (`--format=plain`).
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpRequest {
    /// Every object of the target database, or of one schema.
    Database {
        format: DumpFormat,
        schema: Option<String>,
    },
    /// DDL only for one schema, as plain SQL.
    SchemaOnly { schema: String },
    /// Roles, tablespaces and cluster-wide settings, as plain SQL.
    Globals,
}

/// A table that can be exported incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedTable {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl TimestampedTable {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalScan {
    pub candidates: Vec<TimestampedTable>,
    /// `schema.table` names without a usable timestamp column.
    pub skipped: Vec<String>,
}

#[allow(async_fn_in_trait)]
pub trait DbConnector {
    /// Trivial round-trip; fails with `Unreachable` after a bounded wait.
    async fn ping(&self) -> Result<()>;

    async fn server_version(&self) -> Result<String>;

    /// Human-readable size of the database, or of one schema's tables.
    async fn database_size(&self, schema: Option<&str>) -> Result<String>;

    /// Non-system schemas, ordered by name.
    async fn list_schemas(&self) -> Result<Vec<String>>;

    /// Base tables in scope, split by whether they carry a timestamp column.
    async fn incremental_scan(&self, schema: Option<&str>) -> Result<IncrementalScan>;

    /// Runs the dump primitive and leaves its output at `dest`.
    async fn run_dump(&self, request: &DumpRequest, dest: &Path) -> Result<()>;

    /// Streams `COPY ... TO STDOUT` text for rows modified after `since`
    /// into `dest`, returning the number of bytes written.
    async fn export_changed_rows(
        &self,
        table: &TimestampedTable,
        since: DateTime<Utc>,
        dest: &Path,
    ) -> Result<u64>;
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
