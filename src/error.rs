//! Application error model
//!
//! Every error that crosses the engine boundary carries a stable code, a
//! user-friendly message, optional internal detail for logging, and a
//! retry hint. Module-level errors (`DbError`, `RemoteError`, ...) convert
//! into this type at the `SyncEngine` surface.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes, format `CATEGORY_SPECIFIC_ERROR`
pub mod codes {
    pub const VALIDATION_ARITY_MISMATCH: &str = "VALIDATION_ARITY_MISMATCH";

    pub const NETWORK_CONNECTION_FAILED: &str = "NETWORK_CONNECTION_FAILED";
    pub const NETWORK_REMOTE_REJECTED: &str = "NETWORK_REMOTE_REJECTED";

    pub const IO_FILE_NOT_FOUND: &str = "IO_FILE_NOT_FOUND";
    pub const IO_PERMISSION_DENIED: &str = "IO_PERMISSION_DENIED";
    pub const IO_ERROR: &str = "IO_ERROR";

    pub const DB_QUERY_FAILED: &str = "DB_QUERY_FAILED";
    pub const DB_LOCK_FAILED: &str = "DB_LOCK_FAILED";
    pub const DB_INTEGRITY_ERROR: &str = "DB_INTEGRITY_ERROR";
    pub const DB_EXECUTOR_CLOSED: &str = "DB_EXECUTOR_CLOSED";

    pub const INGEST_FETCH_FAILED: &str = "INGEST_FETCH_FAILED";
    pub const INGEST_MIXED_COLUMNS: &str = "INGEST_MIXED_COLUMNS";

    pub const STORE_CHECKPOINT_FAILED: &str = "STORE_CHECKPOINT_FAILED";
}

/// Coarse grouping for upstream display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Validation,
    Network,
    Io,
    Database,
    Sync,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Io => "io",
            Self::Database => "database",
            Self::Sync => "sync",
        };
        write!(f, "{name}")
    }
}

/// Engine-boundary error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    /// Internal detail for logging, never shown to the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub retryable: bool,
    pub category: ErrorCategory,
}

impl AppError {
    fn new(code: &str, message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            detail: None,
            retryable: false,
            category,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn db_query_failed(detail: impl Into<String>) -> Self {
        Self::new(
            codes::DB_QUERY_FAILED,
            "Database operation failed",
            ErrorCategory::Database,
        )
        .with_detail(detail)
    }

    pub fn db_lock_failed(detail: impl Into<String>) -> Self {
        Self::new(codes::DB_LOCK_FAILED, "Database is busy", ErrorCategory::Database)
            .with_detail(detail)
            .retryable()
    }

    pub fn db_executor_closed() -> Self {
        Self::new(
            codes::DB_EXECUTOR_CLOSED,
            "Database write scheduler is not running",
            ErrorCategory::Database,
        )
    }

    pub fn db_integrity_error() -> Self {
        Self::new(
            codes::DB_INTEGRITY_ERROR,
            "Database corruption detected",
            ErrorCategory::Database,
        )
    }

    pub fn connection_failed(detail: impl Into<String>) -> Self {
        Self::new(
            codes::NETWORK_CONNECTION_FAILED,
            "Connection failed",
            ErrorCategory::Network,
        )
        .with_detail(detail)
        .retryable()
    }

    pub fn remote_rejected(detail: impl Into<String>) -> Self {
        Self::new(
            codes::NETWORK_REMOTE_REJECTED,
            "Remote server rejected the request",
            ErrorCategory::Network,
        )
        .with_detail(detail)
    }

    pub fn ingest_fetch_failed(detail: impl Into<String>) -> Self {
        Self::new(
            codes::INGEST_FETCH_FAILED,
            "Failed to fetch remote snapshot",
            ErrorCategory::Sync,
        )
        .with_detail(detail)
        .retryable()
    }

    pub fn ingest_mixed_columns(table: &str) -> Self {
        Self::new(
            codes::INGEST_MIXED_COLUMNS,
            format!("Remote rows for '{table}' have inconsistent columns"),
            ErrorCategory::Sync,
        )
    }

    pub fn store_checkpoint_failed(detail: impl Into<String>) -> Self {
        Self::new(
            codes::STORE_CHECKPOINT_FAILED,
            "Failed to persist survey responses",
            ErrorCategory::Io,
        )
        .with_detail(detail)
    }

    pub fn arity_mismatch(detail: impl Into<String>) -> Self {
        Self::new(
            codes::VALIDATION_ARITY_MISMATCH,
            "Statement placeholders do not match parameters",
            ErrorCategory::Validation,
        )
        .with_detail(detail)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        let (code, message) = match e.kind() {
            std::io::ErrorKind::NotFound => {
                (codes::IO_FILE_NOT_FOUND, "File or directory not found")
            }
            std::io::ErrorKind::PermissionDenied => {
                (codes::IO_PERMISSION_DENIED, "Permission denied")
            }
            _ => (codes::IO_ERROR, "I/O error"),
        };
        Self::new(code, message, ErrorCategory::Io).with_detail(e.to_string())
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(e: crate::db::DbError) -> Self {
        use crate::db::{DbError, DbExecutorError};
        match &e {
            DbError::Executor(DbExecutorError::ChannelClosed) => Self::db_executor_closed(),
            DbError::Corruption => Self::db_integrity_error(),
            DbError::Render(r) => Self::arity_mismatch(r.to_string()),
            DbError::Sqlite(inner) if crate::db::retry::is_busy(inner) => {
                Self::db_lock_failed(inner.to_string())
            }
            _ => Self::db_query_failed(e.to_string()),
        }
    }
}

impl From<crate::remote::RemoteError> for AppError {
    fn from(e: crate::remote::RemoteError) -> Self {
        match &e {
            crate::remote::RemoteError::Api { .. } => Self::remote_rejected(e.to_string()),
            _ => Self::connection_failed(e.to_string()),
        }
    }
}

impl From<crate::ingest::IngestError> for AppError {
    fn from(e: crate::ingest::IngestError) -> Self {
        use crate::ingest::IngestError;
        match e {
            IngestError::MixedColumns { ref table, .. } => Self::ingest_mixed_columns(table),
            IngestError::NoColumns { ref table } => Self::ingest_mixed_columns(table),
            IngestError::UnknownColumn { ref table, .. } => {
                Self::ingest_mixed_columns(table).with_detail(e.to_string())
            }
            IngestError::Remote(inner) => Self::ingest_fetch_failed(inner.to_string()),
            IngestError::Db(inner) => inner.into(),
        }
    }
}

impl From<crate::sync::SyncError> for AppError {
    fn from(e: crate::sync::SyncError) -> Self {
        match e {
            crate::sync::SyncError::Db(inner) => inner.into(),
        }
    }
}

impl From<crate::kv::StoreError> for AppError {
    fn from(e: crate::kv::StoreError) -> Self {
        Self::store_checkpoint_failed(e.to_string())
    }
}
