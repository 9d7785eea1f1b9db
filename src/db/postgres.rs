// farmdb-backup/src/db/postgres.rs
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;

use super::{
    quote_ident, DbConnector, DumpFormat, DumpRequest, IncrementalScan, TimestampedTable,
    TIMESTAMP_COLUMNS,
};
use crate::config::{ConnectionKind, DatabaseSettings, Endpoint};
use crate::errors::{AppError, Result};
use crate::utils::command::{CommandRunner, CommandSpec};

/// Upper bound for a connectivity round-trip.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PgConnector<R> {
    pub(crate) pool: PgPool,
    pub(crate) settings: DatabaseSettings,
    pub(crate) endpoint: Endpoint,
    pub(crate) pooler: Endpoint,
    pub(crate) kind: ConnectionKind,
    pub(crate) runner: R,
}

impl<R: CommandRunner> PgConnector<R> {
    /// Builds a lazily-connecting pool; nothing touches the network until the
    /// first query.
    pub fn new(
        settings: &DatabaseSettings,
        kind: ConnectionKind,
        pooler: &Endpoint,
        runner: R,
    ) -> Self {
        let endpoint = match kind {
            ConnectionKind::Direct => settings.direct_endpoint(),
            ConnectionKind::Pooled => pooler.clone(),
        };

        let mut options = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&settings.user)
            .database(&settings.name)
            .application_name("farmdb-backup");
        if !settings.password.is_empty() {
            options = options.password(&settings.password);
        }
        if kind == ConnectionKind::Pooled {
            // Named prepared statements do not survive transaction pooling.
            options = options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_lazy_with(options);

        Self {
            pool,
            settings: settings.clone(),
            endpoint,
            pooler: pooler.clone(),
            kind,
            runner,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Connection arguments shared by every CLI invocation.
    pub(crate) fn cli_spec(&self, program: &str, endpoint: &Endpoint, database: &str) -> CommandSpec {
        let db_flag = if program == "pg_dumpall" { "-l" } else { "-d" };
        CommandSpec::new(program)
            .args([
                "-h".to_string(),
                endpoint.host.clone(),
                "-p".to_string(),
                endpoint.port.to_string(),
                "-U".to_string(),
                self.settings.user.clone(),
                db_flag.to_string(),
                database.to_string(),
                "--no-password".to_string(),
            ])
            .env("PGPASSWORD", self.settings.password.clone())
            .in_container()
    }

    fn dump_spec(&self, request: &DumpRequest) -> CommandSpec {
        match request {
            DumpRequest::Database { format, schema } => {
                let mut spec = self
                    .cli_spec("pg_dump", &self.endpoint, &self.settings.name)
                    .arg(match format {
                        DumpFormat::Custom => "--format=custom",
                        DumpFormat::Plain => "--format=plain",
                    });
                if let Some(schema) = schema {
                    spec = spec.arg(schema_pattern(schema));
                }
                spec
            }
            DumpRequest::SchemaOnly { schema } => self
                .cli_spec("pg_dump", &self.endpoint, &self.settings.name)
                .args(["--format=plain".to_string(), "--schema-only".to_string()])
                .arg(schema_pattern(schema)),
            DumpRequest::Globals => self
                .cli_spec("pg_dumpall", &self.endpoint, &self.settings.name)
                .arg("--globals-only"),
        }
    }
}

/// pg_dump folds unquoted patterns to lower case; quoting matches the name exactly.
fn schema_pattern(schema: &str) -> String {
    format!("--schema={}", quote_ident(schema))
}

/// Sibling path a dump streams into before it is renamed into place.
pub fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dump".to_string());
    dest.with_file_name(format!(".{}.partial", name))
}

impl<R: CommandRunner> DbConnector for PgConnector<R> {
    async fn ping(&self) -> Result<()> {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        match timeout(CONNECT_TIMEOUT, probe).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::Unreachable(format!("{} ({})", self.endpoint, e))),
            Err(_) => Err(AppError::Unreachable(format!(
                "{} did not answer within {}s",
                self.endpoint,
                CONNECT_TIMEOUT.as_secs()
            ))),
        }
    }

    async fn server_version(&self) -> Result<String> {
        let version: String = sqlx::query_scalar("SHOW server_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    async fn database_size(&self, schema: Option<&str>) -> Result<String> {
        let size: String = match schema {
            None => {
                sqlx::query_scalar("SELECT pg_size_pretty(pg_database_size(current_database()))")
                    .fetch_one(&self.pool)
                    .await?
            }
            Some(schema) => {
                sqlx::query_scalar(
                    "SELECT pg_size_pretty(COALESCE(SUM(pg_total_relation_size(format('%I.%I', schemaname, tablename)::regclass)), 0)::bigint)
                     FROM pg_tables WHERE schemaname = $1",
                )
                .bind(schema)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(size)
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let schemas: Vec<String> = sqlx::query_scalar(
            "SELECT nspname::text FROM pg_namespace
             WHERE nspname NOT LIKE 'pg\\_%' AND nspname <> 'information_schema'
             ORDER BY nspname",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(schemas)
    }

    async fn incremental_scan(&self, schema: Option<&str>) -> Result<IncrementalScan> {
        let preferred: Vec<String> = TIMESTAMP_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT t.table_schema::text, t.table_name::text,
                    (SELECT c.column_name::text
                       FROM information_schema.columns c
                      WHERE c.table_schema = t.table_schema
                        AND c.table_name = t.table_name
                        AND c.column_name::text = ANY($1)
                        AND c.data_type::text LIKE 'timestamp%'
                      ORDER BY array_position($1, c.column_name::text)
                      LIMIT 1)
               FROM information_schema.tables t
              WHERE t.table_type = 'BASE TABLE'
                AND t.table_schema::text <> 'information_schema'
                AND t.table_schema::text NOT LIKE 'pg\\_%'
                AND ($2::text IS NULL OR t.table_schema::text = $2)
              ORDER BY 1, 2",
        )
        .bind(&preferred)
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;

        let mut scan = IncrementalScan::default();
        for (schema, table, column) in rows {
            match column {
                Some(column) => scan.candidates.push(TimestampedTable { schema, table, column }),
                None => scan.skipped.push(format!("{}.{}", schema, table)),
            }
        }
        Ok(scan)
    }

    async fn run_dump(&self, request: &DumpRequest, dest: &Path) -> Result<()> {
        let partial = partial_path(dest);
        let spec = self.dump_spec(request).stdout_to(&partial);
        tracing::debug!(command = %spec.display(), dest = %dest.display(), "starting dump");

        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(AppError::DumpFailed(e.to_string()));
            }
        };
        if !output.success() {
            let _ = std::fs::remove_file(&partial);
            return Err(AppError::DumpFailed(format!(
                "{} failed with {}",
                spec.program,
                output.failure_summary()
            )));
        }

        std::fs::rename(&partial, dest).map_err(|e| AppError::fs("move dump into", dest, e))?;
        Ok(())
    }

    async fn export_changed_rows(
        &self,
        table: &TimestampedTable,
        since: DateTime<Utc>,
        dest: &Path,
    ) -> Result<u64> {
        let query = format!(
            "COPY (SELECT * FROM {} WHERE {} > '{}') TO STDOUT",
            table.qualified_name(),
            quote_ident(&table.column),
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let spec = self
            .cli_spec("psql", &self.endpoint, &self.settings.name)
            .args(["-X", "-q", "-v", "ON_ERROR_STOP=1", "-c"])
            .arg(query)
            .stdout_to(dest);

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| AppError::DumpFailed(e.to_string()))?;
        if !output.success() {
            return Err(AppError::DumpFailed(format!(
                "export of {} failed with {}",
                table.qualified_name(),
                output.failure_summary()
            )));
        }
        let bytes = std::fs::metadata(dest)
            .map_err(|e| AppError::fs("read exported rows from", dest, e))?
            .len();
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use chrono::TimeZone;

    fn settings() -> DatabaseSettings {
        DatabaseSettings {
            host: "db".into(),
            port: 5432,
            user: "agri".into(),
            password: "secret".into(),
            name: "farm".into(),
        }
    }

    fn pooler() -> Endpoint {
        Endpoint {
            host: "pgbouncer".into(),
            port: 6432,
        }
    }

    #[tokio::test]
    async fn pooled_connector_targets_pooler() {
        let connector = PgConnector::new(&settings(), ConnectionKind::Pooled, &pooler(), FakeRunner::default());
        assert_eq!(connector.endpoint().to_string(), "pgbouncer:6432");

        let direct = PgConnector::new(&settings(), ConnectionKind::Direct, &pooler(), FakeRunner::default());
        assert_eq!(direct.endpoint().to_string(), "db:5432");
    }

    #[tokio::test]
    async fn dump_specs_select_format_and_scope() {
        let connector = PgConnector::new(&settings(), ConnectionKind::Direct, &pooler(), FakeRunner::default());

        let custom = connector.dump_spec(&DumpRequest::Database {
            format: DumpFormat::Custom,
            schema: Some("public".into()),
        });
        assert_eq!(custom.program, "pg_dump");
        assert!(custom.args.contains(&"--format=custom".to_string()));
        assert!(custom.args.contains(&"--schema=\"public\"".to_string()));
        assert!(custom.in_container);
        assert_eq!(custom.env, vec![("PGPASSWORD".to_string(), "secret".to_string())]);

        let schema_only = connector.dump_spec(&DumpRequest::SchemaOnly { schema: "sensors".into() });
        assert!(schema_only.args.contains(&"--schema-only".to_string()));
        assert!(schema_only.args.contains(&"--format=plain".to_string()));

        let globals = connector.dump_spec(&DumpRequest::Globals);
        assert_eq!(globals.program, "pg_dumpall");
        assert!(globals.args.contains(&"--globals-only".to_string()));
        assert!(globals.args.contains(&"-l".to_string()));
    }

    #[tokio::test]
    async fn successful_dump_is_moved_from_partial_path() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = FakeRunner::default().with_stdout("pg_dump", b"PGDMP-archive".to_vec());
        let connector = PgConnector::new(&settings(), ConnectionKind::Direct, &pooler(), runner);

        let dest = dir.path().join("full_20261018_020000.dump");
        connector
            .run_dump(&DumpRequest::Database { format: DumpFormat::Custom, schema: None }, &dest)
            .await?;

        assert_eq!(std::fs::read(&dest)?, b"PGDMP-archive");
        assert!(!partial_path(&dest).exists());
        let calls = connector.runner().calls();
        assert_eq!(calls[0].stdout_to.as_deref(), Some(partial_path(&dest).as_path()));
        Ok(())
    }

    #[tokio::test]
    async fn failed_dump_leaves_nothing_behind() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = FakeRunner::default().with_failure("pg_dump", 1, "permission denied");
        let connector = PgConnector::new(&settings(), ConnectionKind::Direct, &pooler(), runner);

        let dest = dir.path().join("full.dump");
        let err = connector
            .run_dump(&DumpRequest::Database { format: DumpFormat::Custom, schema: None }, &dest)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DumpFailed");
        assert!(err.to_string().contains("permission denied"));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
        Ok(())
    }

    #[tokio::test]
    async fn changed_rows_query_is_bounded_by_anchor() -> anyhow::Result<()> {
        let runner = FakeRunner::default().with_stdout("psql", b"1\tnorth\n".to_vec());
        let connector = PgConnector::new(&settings(), ConnectionKind::Direct, &pooler(), runner);
        let table = TimestampedTable {
            schema: "public".into(),
            table: "fields".into(),
            column: "updated_at".into(),
        };
        let since = Utc.with_ymd_and_hms(2026, 10, 17, 2, 0, 0).unwrap();

        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("rows");
        let bytes = connector.export_changed_rows(&table, since, &dest).await?;
        assert_eq!(bytes, 8);
        assert_eq!(std::fs::read(&dest)?, b"1\tnorth\n");

        let calls = connector.runner().calls();
        assert_eq!(calls[0].stdout_to.as_deref(), Some(dest.as_path()));
        let query = calls[0].args.last().cloned().unwrap_or_default();
        assert_eq!(
            query,
            "COPY (SELECT * FROM \"public\".\"fields\" WHERE \"updated_at\" > '2026-10-17T02:00:00Z') TO STDOUT"
        );
        Ok(())
    }

    #[tokio::test]
    async fn schema_patterns_keep_case() {
        let connector = PgConnector::new(&settings(), ConnectionKind::Direct, &pooler(), FakeRunner::default());
        let spec = connector.dump_spec(&DumpRequest::SchemaOnly { schema: "Sensors".into() });
        assert!(spec.args.contains(&"--schema=\"Sensors\"".to_string()));

        let spec = connector.dump_spec(&DumpRequest::Database {
            format: DumpFormat::Plain,
            schema: Some("odd\"name".into()),
        });
        assert!(spec.args.contains(&"--schema=\"odd\"\"name\"".to_string()));
    }

    #[test]
    fn partial_path_is_hidden_sibling() {
        let dest = Path::new("/b/postgres/daily/20261018_020000/full_20261018_020000.dump");
        assert_eq!(
            partial_path(dest),
            Path::new("/b/postgres/daily/20261018_020000/.full_20261018_020000.dump.partial")
        );
    }
}
