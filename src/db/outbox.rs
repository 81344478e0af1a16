//! Write-ahead outbox for FieldSync
//!
//! Every caller-issued mutation is rendered to a literal SQL statement and
//! appended to `outbox_logs` in the same scheduled unit of work, log first.
//! The sync dispatcher is the only consumer: rows are deleted exactly once,
//! on confirmed remote acknowledgment. Captured media uses a parallel queue
//! (`media_outbox`) where rows are never deleted; a status flag flips after
//! a confirmed upload.

use crate::db::SqlValue;
use chrono::Utc;
use rusqlite::{params, Connection};
use thiserror::Error;

pub const OUTBOX_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS outbox_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    statement TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

pub const MEDIA_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS media_outbox (
    id TEXT PRIMARY KEY,
    parent_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    local_path TEXT NOT NULL,
    sync_status INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_media_outbox_status ON media_outbox(sync_status);
";

/// A pending outbox row awaiting replay
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub statement: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A captured photo awaiting upload
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MediaEntry {
    pub id: String,
    pub parent_id: String,
    pub filename: String,
    pub local_path: String,
    pub sync_status: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("statement has {placeholders} placeholders but {params} parameters were given")]
    ArityMismatch { placeholders: usize, params: usize },
}

/// Render a `?`-templated statement with every parameter inlined as a
/// literal. This text is what the sync dispatcher replays against the
/// remote server, so the escaping here is a correctness boundary.
pub fn render_literal(template: &str, params: &[SqlValue]) -> Result<String, RenderError> {
    let placeholders = template.matches('?').count();
    if placeholders != params.len() {
        return Err(RenderError::ArityMismatch {
            placeholders,
            params: params.len(),
        });
    }

    let mut rendered = String::with_capacity(template.len() + params.len() * 8);
    let mut values = params.iter();
    for ch in template.chars() {
        if ch == '?' {
            // Count was checked above, so the iterator cannot run dry
            if let Some(value) = values.next() {
                rendered.push_str(&value.to_literal());
            }
        } else {
            rendered.push(ch);
        }
    }

    Ok(rendered)
}

// ============================================================================
// Outbox rows
// ============================================================================

/// Append a rendered statement to the outbox
pub fn insert_log(conn: &Connection, statement: &str) -> rusqlite::Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO outbox_logs (statement, created_at, updated_at) VALUES (?, ?, ?)",
        params![statement, now, now],
    )?;
    Ok(())
}

/// All pending entries, oldest first
pub fn pending(conn: &Connection) -> rusqlite::Result<Vec<OutboxEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, statement, created_at, updated_at FROM outbox_logs ORDER BY id ASC",
    )?;

    let entries = stmt
        .query_map([], |row| {
            Ok(OutboxEntry {
                id: row.get(0)?,
                statement: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Delete one entry after confirmed remote acknowledgment
pub fn delete_log(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM outbox_logs WHERE id = ?", [id])?;
    Ok(())
}

/// Count of pending entries
pub fn count_pending(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM outbox_logs", [], |row| row.get(0))
}

// ============================================================================
// Media queue
// ============================================================================

/// Queue a captured photo for upload
pub fn queue_media(conn: &Connection, entry: &MediaEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO media_outbox (id, parent_id, filename, local_path, sync_status)
         VALUES (?, ?, ?, ?, ?)",
        params![
            entry.id,
            entry.parent_id,
            entry.filename,
            entry.local_path,
            entry.sync_status,
        ],
    )?;
    Ok(())
}

/// All unsynced media rows, oldest first
pub fn pending_media(conn: &Connection) -> rusqlite::Result<Vec<MediaEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, parent_id, filename, local_path, sync_status
         FROM media_outbox WHERE sync_status = 0 ORDER BY rowid ASC",
    )?;

    let entries = stmt
        .query_map([], |row| {
            Ok(MediaEntry {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                filename: row.get(2)?,
                local_path: row.get(3)?,
                sync_status: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Flip a media row to synced after a confirmed upload. The row stays:
/// media entries are a status ledger, not a delete-on-ack queue.
pub fn mark_media_synced(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE media_outbox SET sync_status = 1 WHERE id = ?",
        [id],
    )?;
    Ok(())
}

/// Count of unsynced media rows
pub fn count_pending_media(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM media_outbox WHERE sync_status = 0",
        [],
        |row| row.get(0),
    )
}
