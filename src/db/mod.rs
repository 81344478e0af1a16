//! Database module for FieldSync
//! Embedded SQLite store: WAL journaling, single-writer scheduling, outbox

pub mod executor;
pub mod outbox;
pub mod retry;

pub use executor::{DbExecutor, DbExecutorError};

use crate::schema;
use retry::RetryPolicy;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Busy timeout applied at open time (milliseconds)
const BUSY_TIMEOUT_MS: u32 = 10_000;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Write scheduler stopped: {0}")]
    Executor(#[from] DbExecutorError),
    #[error("Outbox rendering failed: {0}")]
    Render(#[from] outbox::RenderError),
    #[error("Database corruption detected")]
    Corruption,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A database value, used both for parameter binding and for rendering
/// outbox statements as literals.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
    Null,
}

impl SqlValue {
    /// Render as a SQL literal: strings single-quoted with embedded quotes
    /// doubled, numbers bare, blobs as X'..', null as NULL.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Integer(i) => i.to_string(),
            Self::Real(f) => f.to_string(),
            Self::Blob(b) => format!("X'{}'", hex::encode(b)),
            Self::Null => "NULL".to_string(),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
            Self::Integer(i) => ToSqlOutput::from(*i),
            Self::Real(f) => ToSqlOutput::from(*f),
            Self::Blob(b) => ToSqlOutput::from(b.as_slice()),
            Self::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
        })
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A fetched row: column name to value
pub type Row = BTreeMap<String, SqlValue>;

/// Map a rusqlite row into a [`Row`] using pre-collected column names
pub fn row_to_map(names: &[String], row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut map = Row::new();
    for (i, name) in names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        };
        map.insert(name.clone(), value);
    }
    Ok(map)
}

/// Connection manager: owns the writer connection and its open-time setup.
///
/// The writer moves into the [`DbExecutor`] thread after open; reads use a
/// second connection from [`Database::open_reader`] and rely on WAL reader
/// concurrency.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Open or create the database and apply durability pragmas.
    ///
    /// Pragma failures are logged and non-fatal; the engine proceeds with
    /// SQLite defaults.
    pub fn open(path: &Path, retry_policy: RetryPolicy) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn, retry_policy);

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a second connection against the same file for reads
    pub fn open_reader(&self, retry_policy: RetryPolicy) -> Result<Connection, DbError> {
        let conn = Connection::open(&self.path)?;
        apply_pragmas(&conn, retry_policy);
        Ok(conn)
    }

    /// Check database integrity
    pub fn check_integrity(&self) -> Result<(), DbError> {
        check_integrity(&self.conn)
    }

    /// Create all registry and engine tables
    pub fn create_tables(&self) -> Result<(), DbError> {
        create_all_tables(&self.conn).map_err(DbError::Sqlite)
    }

    /// Get inner connection reference
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Apply WAL, synchronous, and busy-timeout pragmas through the lock-retry
/// wrapper; pragma calls themselves may race on cold start.
fn apply_pragmas(conn: &Connection, retry_policy: RetryPolicy) {
    let result = retry::with_retry_blocking(retry_policy, || {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA synchronous=NORMAL;\n\
             PRAGMA busy_timeout={};",
            BUSY_TIMEOUT_MS
        ))
    });

    if let Err(e) = result {
        warn!(error = %e, "failed to apply database pragmas, continuing with engine defaults");
    }
}

/// Check database integrity on an arbitrary connection
pub fn check_integrity(conn: &Connection) -> Result<(), DbError> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;

    if result != "ok" {
        return Err(DbError::Corruption);
    }

    Ok(())
}

/// Create every registry table plus the engine's own outbox tables.
///
/// Foreign-key enforcement is disabled for the lifetime of this connection:
/// registry foreign keys are index-only, and bulk ingestion must be free to
/// replace parent rows out from under children.
pub fn create_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=OFF;")?;

    for entity in schema::REGISTRY {
        conn.execute(&entity.create_table_sql(), [])?;
        for index in entity.index_sql() {
            conn.execute(&index, [])?;
        }
    }

    conn.execute_batch(outbox::OUTBOX_TABLE_DDL)?;
    conn.execute_batch(outbox::MEDIA_TABLE_DDL)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path, RetryPolicy::default()).unwrap();
        db.create_tables().unwrap();
        (db, dir)
    }

    #[test]
    fn test_database_creation() {
        let (db, _dir) = create_test_db();
        assert!(db.check_integrity().is_ok());
    }

    #[test]
    fn test_pragmas_applied() {
        let (db, _dir) = create_test_db();

        let journal: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal.to_lowercase(), "wal");

        let sync: i64 = db
            .conn()
            .query_row("PRAGMA synchronous", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sync, 1, "synchronous should be NORMAL");

        let timeout: i64 = db
            .conn()
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert!(timeout >= 10_000);
    }

    #[test]
    fn test_all_registry_tables_created() {
        let (db, _dir) = create_test_db();

        for entity in schema::REGISTRY {
            let count: i64 = db
                .conn()
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [entity.name],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", entity.name);
        }

        // Engine tables exist too
        for table in ["outbox_logs", "media_outbox"] {
            let count: i64 = db
                .conn()
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_foreign_key_indexes_created() {
        let (db, _dir) = create_test_db();

        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_job_units_job_number'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reader_sees_writer_commits() {
        let (db, _dir) = create_test_db();
        let reader = db.open_reader(RetryPolicy::default()).unwrap();

        db.conn()
            .execute(
                "INSERT INTO inspection_jobs (job_number, site_name) VALUES (?, ?)",
                ["J-100", "Harbour Point"],
            )
            .unwrap();

        let site: String = reader
            .query_row(
                "SELECT site_name FROM inspection_jobs WHERE job_number = ?",
                ["J-100"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(site, "Harbour Point");
    }

    #[test]
    fn test_sql_value_literals() {
        assert_eq!(SqlValue::Text("plain".into()).to_literal(), "'plain'");
        assert_eq!(
            SqlValue::Text("it's here".into()).to_literal(),
            "'it''s here'"
        );
        assert_eq!(SqlValue::Integer(42).to_literal(), "42");
        assert_eq!(SqlValue::Real(1.5).to_literal(), "1.5");
        assert_eq!(SqlValue::Null.to_literal(), "NULL");
        assert_eq!(SqlValue::Blob(vec![0xde, 0xad]).to_literal(), "X'dead'");
    }

    #[test]
    fn test_row_mapping() {
        let (db, _dir) = create_test_db();
        db.conn()
            .execute(
                "INSERT INTO inspection_jobs (job_number, site_name, context_id) VALUES ('J-1', 'Depot', 7)",
                [],
            )
            .unwrap();

        let mut stmt = db
            .conn()
            .prepare("SELECT job_number, site_name, context_id, status FROM inspection_jobs")
            .unwrap();
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows: Vec<Row> = stmt
            .query_map([], |row| row_to_map(&names, row))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["job_number"], SqlValue::Text("J-1".into()));
        assert_eq!(rows[0]["context_id"], SqlValue::Integer(7));
        assert_eq!(rows[0]["status"], SqlValue::Null);
    }
}
