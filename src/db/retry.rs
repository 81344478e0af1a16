//! Lock-retry wrapper for transient SQLite busy/locked failures
//!
//! The busy-timeout pragma is the first line of defense; under WAL with
//! concurrent readers SQLite can still surface SQLITE_BUSY, so every
//! database call goes through a bounded exponential backoff as well.
//! Non-busy errors are never retried.

use rusqlite::ffi::ErrorCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded backoff policy: attempt N sleeps `base_delay_ms * 2^(N-1)`
/// before attempt N+1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (default: 8)
    pub max_attempts: u32,
    /// Backoff base delay in milliseconds (default: 300)
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 300,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << (attempt - 1).min(30)))
    }
}

/// True when the error carries SQLite's busy/locked signature
pub fn is_busy(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
                || msg.as_deref().is_some_and(|m| {
                    m.contains("database is locked") || m.contains("database table is locked")
                })
        }
        _ => false,
    }
}

/// Blocking variant, used on the write-scheduler thread where sleeping
/// intentionally holds back the rest of the queue.
pub fn with_retry_blocking<T>(
    policy: RetryPolicy,
    op: impl Fn() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) && attempt < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "database busy, retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Async variant for read paths and pragma setup
pub async fn with_retry<T, F>(policy: RetryPolicy, mut op: F) -> rusqlite::Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) && attempt < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "database busy, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
