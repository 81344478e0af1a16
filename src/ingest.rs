//! Bulk ingestion pipeline
//!
//! Refreshes the local cache tables from full remote snapshots. Each entity
//! is one transaction: rows are partitioned into fixed-size batches and each
//! batch becomes one multi-row `INSERT OR REPLACE`. Local rows are a cache
//! of server-owned truth, so conflicts resolve remote-wins and nothing here
//! is outbox-logged.
//!
//! The column set for an entity is taken from the first row and validated
//! uniform across the whole payload before any SQL is built; heterogeneous
//! rows fail fast instead of silently producing a malformed statement.

use crate::db::{DbError, SqlValue};
use crate::local::LocalDb;
use crate::remote::{RemoteClient, RemoteError, RemoteRow};
use crate::schema::{self, Entity};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("rows for '{table}' have inconsistent columns (first differing row: {row_index})")]
    MixedColumns { table: String, row_index: usize },
    #[error("rows for '{table}' carry no columns")]
    NoColumns { table: String },
    #[error("remote rows for '{table}' carry unknown column '{column}'")]
    UnknownColumn { table: String, column: String },
}

/// Totals for one ingestion pass
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestReport {
    pub entities: usize,
    pub rows: usize,
    pub batches: usize,
}

/// Per-entity totals
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityStats {
    pub rows: usize,
    pub batches: usize,
}

/// One batched upsert statement with its flattened parameters
#[derive(Debug)]
pub struct Batch {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

pub struct Ingestor {
    local: Arc<LocalDb>,
    remote: Arc<RemoteClient>,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(local: Arc<LocalDb>, remote: Arc<RemoteClient>, batch_size: usize) -> Self {
        Self {
            local,
            remote,
            batch_size,
        }
    }

    /// Refresh every registry entity from the remote source.
    ///
    /// The first failing entity aborts the pass; entities already ingested
    /// stay (each committed in its own transaction).
    pub async fn ingest_all(&self, context_id: i64) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();

        for entity in schema::REGISTRY {
            let stats = self.ingest_entity(entity, context_id).await?;
            report.entities += 1;
            report.rows += stats.rows;
            report.batches += stats.batches;
        }

        info!(
            entities = report.entities,
            rows = report.rows,
            batches = report.batches,
            "ingestion pass complete"
        );
        Ok(report)
    }

    /// Refresh one entity: fetch the snapshot, then upsert it in a single
    /// transaction of batched statements.
    pub async fn ingest_entity(
        &self,
        entity: &Entity,
        context_id: i64,
    ) -> Result<EntityStats, IngestError> {
        let rows = self.remote.fetch_table(entity.name, context_id).await?;
        if rows.is_empty() {
            debug!(table = entity.name, "no remote rows");
            return Ok(EntityStats::default());
        }

        let columns = uniform_columns(entity.name, &rows)?;
        validate_against_schema(entity, &columns)?;
        let batches = build_batches(entity.name, &columns, &rows, self.batch_size);
        let stats = EntityStats {
            rows: rows.len(),
            batches: batches.len(),
        };

        self.local
            .write(move |conn| {
                let tx = conn.unchecked_transaction()?;
                for batch in &batches {
                    tx.execute(&batch.sql, rusqlite::params_from_iter(batch.params.iter()))?;
                }
                tx.commit()
            })
            .await?;

        debug!(
            table = entity.name,
            rows = stats.rows,
            batches = stats.batches,
            "entity ingested"
        );
        Ok(stats)
    }
}

/// Column set from the first row, validated identical on every other row
pub fn uniform_columns(table: &str, rows: &[RemoteRow]) -> Result<Vec<String>, IngestError> {
    let first: Vec<String> = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();
    if first.is_empty() {
        return Err(IngestError::NoColumns {
            table: table.to_string(),
        });
    }

    for (i, row) in rows.iter().enumerate().skip(1) {
        if row.len() != first.len() || !row.keys().zip(first.iter()).all(|(a, b)| a == b) {
            return Err(IngestError::MixedColumns {
                table: table.to_string(),
                row_index: i,
            });
        }
    }

    Ok(first)
}

/// The remote schema is server-owned and fluid, but every column still has
/// to exist in the registry DDL before it reaches a statement
pub fn validate_against_schema(entity: &Entity, columns: &[String]) -> Result<(), IngestError> {
    let known = entity.column_names();
    for column in columns {
        if !known.contains(&column.as_str()) {
            return Err(IngestError::UnknownColumn {
                table: entity.name.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

/// Partition rows into batches and build one multi-row upsert per batch
pub fn build_batches(
    table: &str,
    columns: &[String],
    rows: &[RemoteRow],
    batch_size: usize,
) -> Vec<Batch> {
    let row_placeholder = format!(
        "({})",
        columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
    );

    rows.chunks(batch_size.max(1))
        .map(|chunk| {
            let values = vec![row_placeholder.as_str(); chunk.len()].join(", ");
            let sql = format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES {}",
                table,
                columns.join(", "),
                values
            );

            let params = chunk
                .iter()
                .flat_map(|row| columns.iter().map(|col| sql_value_from_json(&row[col])))
                .collect();

            Batch { sql, params }
        })
        .collect()
}

/// Map a duck-typed remote value onto a database value
fn sql_value_from_json(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        // Nested structures are cached verbatim as JSON text
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::retry::RetryPolicy;

    fn row(pairs: &[(&str, serde_json::Value)]) -> RemoteRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn unit_rows(n: usize) -> Vec<RemoteRow> {
        (0..n)
            .map(|i| {
                row(&[
                    ("id", serde_json::json!(i as i64 + 1)),
                    ("job_number", serde_json::json!("J-1")),
                    ("unit_measure_ref", serde_json::json!(format!("UMR-{i}"))),
                ])
            })
            .collect()
    }

    #[test]
    fn test_batch_partitioning_450_rows() {
        let rows = unit_rows(450);
        let columns = uniform_columns("job_units", &rows).unwrap();
        let batches = build_batches("job_units", &columns, &rows, 200);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].params.len(), 200 * columns.len());
        assert_eq!(batches[1].params.len(), 200 * columns.len());
        assert_eq!(batches[2].params.len(), 50 * columns.len());
        assert!(batches[0].sql.starts_with("INSERT OR REPLACE INTO job_units ("));
        assert_eq!(batches[0].sql.matches("(?, ?, ?)").count(), 200);
        assert_eq!(batches[2].sql.matches("(?, ?, ?)").count(), 50);
    }

    #[test]
    fn test_uniform_columns_rejects_mixed_rows() {
        let rows = vec![
            row(&[("id", serde_json::json!(1)), ("name", serde_json::json!("a"))]),
            row(&[("id", serde_json::json!(2)), ("label", serde_json::json!("b"))]),
        ];

        let err = uniform_columns("question_options", &rows).unwrap_err();
        match err {
            IngestError::MixedColumns { table, row_index } => {
                assert_eq!(table, "question_options");
                assert_eq!(row_index, 1);
            }
            other => panic!("expected MixedColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_column_rejected() {
        let entity = crate::schema::find("job_units").unwrap();
        let columns = vec!["id".to_string(), "serial_no".to_string()];

        let err = validate_against_schema(entity, &columns).unwrap_err();
        match err {
            IngestError::UnknownColumn { table, column } => {
                assert_eq!(table, "job_units");
                assert_eq!(column, "serial_no");
            }
            other => panic!("expected UnknownColumn, got {other:?}"),
        }
    }

    #[test]
    fn test_uniform_columns_rejects_empty_objects() {
        let rows = vec![row(&[])];
        assert!(matches!(
            uniform_columns("job_units", &rows),
            Err(IngestError::NoColumns { .. })
        ));
    }

    #[test]
    fn test_json_value_mapping() {
        assert_eq!(sql_value_from_json(&serde_json::json!(null)), SqlValue::Null);
        assert_eq!(
            sql_value_from_json(&serde_json::json!(true)),
            SqlValue::Integer(1)
        );
        assert_eq!(
            sql_value_from_json(&serde_json::json!(12)),
            SqlValue::Integer(12)
        );
        assert_eq!(
            sql_value_from_json(&serde_json::json!(1.25)),
            SqlValue::Real(1.25)
        );
        assert_eq!(
            sql_value_from_json(&serde_json::json!("x")),
            SqlValue::Text("x".into())
        );
        assert_eq!(
            sql_value_from_json(&serde_json::json!({"a": 1})),
            SqlValue::Text("{\"a\":1}".into())
        );
    }

    #[tokio::test]
    async fn test_batched_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let local =
            LocalDb::open_at(&dir.path().join("test.db"), RetryPolicy::default()).unwrap();
        local.create_tables().await.unwrap();

        let rows = unit_rows(450);
        let columns = uniform_columns("job_units", &rows).unwrap();

        for _ in 0..2 {
            let batches = build_batches("job_units", &columns, &rows, 200);
            local
                .write(move |conn| {
                    let tx = conn.unchecked_transaction()?;
                    for batch in &batches {
                        tx.execute(&batch.sql, rusqlite::params_from_iter(batch.params.iter()))?;
                    }
                    tx.commit()
                })
                .await
                .unwrap();
        }

        let count = local
            .fetch_first("SELECT COUNT(*) AS n FROM job_units", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count["n"], SqlValue::Integer(450));

        let distinct = local
            .fetch_first("SELECT COUNT(DISTINCT id) AS n FROM job_units", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(distinct["n"], SqlValue::Integer(450), "duplicate primary keys");
    }
}
