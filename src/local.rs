//! Local database facade
//!
//! The only database surface callers see. Mutating calls are rendered into
//! the outbox and applied through the exclusive write scheduler in one unit
//! of work; reads go straight to a second reader connection under WAL, with
//! the lock-retry wrapper. Callers never touch a connection directly.

use crate::config::EngineConfig;
use crate::db::retry::{self, RetryPolicy};
use crate::db::{self, outbox, Database, DbError, DbExecutor, DbExecutorError, Row, SqlValue};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct LocalDb {
    executor: DbExecutor,
    reader: Mutex<Connection>,
    path: PathBuf,
    retry: RetryPolicy,
}

impl LocalDb {
    /// Open the database, start the write scheduler, and open the reader
    /// connection.
    pub fn open(config: &EngineConfig) -> Result<Self, DbError> {
        Self::open_at(&config.db_path(), config.retry)
    }

    /// Open at an explicit path (used by tests and the CLI)
    pub fn open_at(path: &Path, retry: RetryPolicy) -> Result<Self, DbError> {
        let db = Database::open(path, retry)?;
        let reader = db.open_reader(retry)?;
        let executor = DbExecutor::new(db, retry);

        Ok(Self {
            executor,
            reader: Mutex::new(reader),
            path: path.to_path_buf(),
            retry,
        })
    }

    /// Create registry and engine tables through the write scheduler
    pub async fn create_tables(&self) -> Result<(), DbError> {
        self.write(db::create_all_tables).await
    }

    /// Operations submitted but not yet executed, for diagnostics
    pub fn queue_depth(&self) -> usize {
        self.executor.queue_depth()
    }

    // ========================================================================
    // Raw read/write primitives
    // ========================================================================

    /// Run a read against the reader connection with lock-retry.
    ///
    /// Reads bypass the write scheduler: WAL lets them run concurrently
    /// with an in-flight writer.
    pub async fn read<T, F>(&self, op: F) -> Result<T, DbError>
    where
        F: Fn(&Connection) -> rusqlite::Result<T>,
    {
        retry::with_retry(self.retry, || {
            let conn = self.reader.lock();
            op(&conn)
        })
        .await
        .map_err(DbError::Sqlite)
    }

    /// Run a write through the exclusive write scheduler.
    ///
    /// Used directly by the ingestion pipeline (server-owned data is never
    /// outbox-logged) and by the sync dispatcher's queue maintenance.
    pub async fn write<T, F>(&self, op: F) -> Result<T, DbError>
    where
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.executor.run(op).await.map_err(|e| match e {
            DbExecutorError::Database(inner) => DbError::Sqlite(inner),
            other => DbError::Executor(other),
        })
    }

    /// Log a rendered statement to the outbox, then apply the mutation, in
    /// one transaction on the scheduler thread.
    ///
    /// A failed logging insert is reported and the mutation still runs:
    /// replay durability for that one operation is best-effort. A failed
    /// mutation rolls the log entry back with it, so an outbox row exists
    /// iff its mutation committed.
    pub async fn log_then_mutate<T, F>(
        &self,
        template: &str,
        params: &[SqlValue],
        mutate: F,
    ) -> Result<T, DbError>
    where
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let rendered = outbox::render_literal(template, params)?;

        self.write(move |conn| {
            let tx = conn.unchecked_transaction()?;
            if let Err(e) = outbox::insert_log(&tx, &rendered) {
                warn!(error = %e, "outbox logging failed; mutation will not be replayable");
            }
            let result = mutate(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await
    }

    // ========================================================================
    // Caller surface
    // ========================================================================

    /// Fetch all rows for a query
    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    db::row_to_map(&names, row)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Fetch the first row for a query, if any
    pub async fn fetch_first(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        let rows = self.fetch_all(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Apply a mutation, outbox-logged, returning the last insert rowid
    pub async fn mutate(&self, sql: &str, params: Vec<SqlValue>) -> Result<i64, DbError> {
        let sql_owned = sql.to_string();
        let exec_params = params.clone();
        self.log_then_mutate(sql, &params, move |conn| {
            conn.execute(&sql_owned, rusqlite::params_from_iter(exec_params.iter()))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Apply a delete, outbox-logged
    pub async fn delete(&self, sql: &str, params: Vec<SqlValue>) -> Result<(), DbError> {
        let sql_owned = sql.to_string();
        let exec_params = params.clone();
        self.log_then_mutate(sql, &params, move |conn| {
            conn.execute(&sql_owned, rusqlite::params_from_iter(exec_params.iter()))?;
            Ok(())
        })
        .await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Check database integrity on the reader connection
    pub async fn check_integrity(&self) -> Result<(), DbError> {
        let result: String = self
            .read(|conn| conn.query_row("PRAGMA integrity_check", [], |row| row.get(0)))
            .await?;

        if result != "ok" {
            return Err(DbError::Corruption);
        }
        Ok(())
    }

    /// Checkpoint the WAL and copy the database file aside
    pub async fn backup(&self, output: Option<PathBuf>) -> Result<PathBuf, DbError> {
        self.write(|conn| conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);"))
            .await?;

        let backup_path = output.unwrap_or_else(|| self.path.with_extension("db.bak"));
        std::fs::copy(&self.path, &backup_path)?;

        Ok(backup_path)
    }
}
