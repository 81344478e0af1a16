//! Exclusive write scheduler for the embedded database
//!
//! A dedicated thread owns the writer connection and drains a FIFO channel,
//! so every write and DDL operation issued anywhere in the engine executes
//! in strict submission order with at most one operation in flight. A
//! failing operation fails only its own caller; the loop keeps draining.
//!
//! # Usage
//!
//! ```ignore
//! let executor = DbExecutor::new(db, RetryPolicy::default());
//!
//! let count = executor.run(|conn| {
//!     conn.query_row("SELECT COUNT(*) FROM outbox_logs", [], |r| r.get(0))
//! }).await?;
//! ```

use crate::db::retry::{self, RetryPolicy};
use crate::db::Database;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use tokio::sync::oneshot;

type DbResult<T> = Result<T, rusqlite::Error>;
type BoxedDbOp = Box<dyn Fn(&rusqlite::Connection) -> BoxedResult + Send + 'static>;
type BoxedResult = Box<dyn std::any::Any + Send + 'static>;

struct DbOperation {
    op: BoxedDbOp,
    response: oneshot::Sender<BoxedResult>,
}

/// Serializes all writes onto one dedicated database thread
pub struct DbExecutor {
    sender: mpsc::Sender<DbOperation>,
    depth: Arc<AtomicUsize>,
    retry_policy: RetryPolicy,
    _handle: thread::JoinHandle<()>,
}

impl DbExecutor {
    /// Take ownership of the writer connection and start the scheduler
    /// thread.
    pub fn new(db: Database, retry_policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::channel::<DbOperation>();
        let depth = Arc::new(AtomicUsize::new(0));
        let thread_depth = depth.clone();

        let handle = thread::spawn(move || {
            let conn = db.conn();

            while let Ok(operation) = receiver.recv() {
                let result = (operation.op)(conn);
                thread_depth.fetch_sub(1, Ordering::SeqCst);
                // Caller may have abandoned the future; the operation has
                // already executed either way.
                let _ = operation.response.send(result);
            }
        });

        Self {
            sender,
            depth,
            retry_policy,
            _handle: handle,
        }
    }

    /// Number of operations submitted but not yet executed
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Enqueue a write operation and await its result.
    ///
    /// The operation must be re-invocable (`Fn`, not `FnOnce`): the
    /// scheduler thread wraps it in the blocking lock-retry, which re-runs
    /// it on transient busy failures.
    pub async fn run<F, T>(&self, op: F) -> Result<T, DbExecutorError>
    where
        F: Fn(&rusqlite::Connection) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let policy = self.retry_policy;

        // Wrap the operation with retry and box the result
        let boxed_op: BoxedDbOp = Box::new(move |conn| {
            let result = retry::with_retry_blocking(policy, || op(conn));
            Box::new(result) as BoxedResult
        });

        let operation = DbOperation {
            op: boxed_op,
            response: response_tx,
        };

        self.depth.fetch_add(1, Ordering::SeqCst);
        self.sender.send(operation).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            DbExecutorError::ChannelClosed
        })?;

        let boxed_result = response_rx
            .await
            .map_err(|_| DbExecutorError::ChannelClosed)?;

        // Downcast the result back to the expected type
        let result = boxed_result
            .downcast::<DbResult<T>>()
            .map_err(|_| DbExecutorError::TypeMismatch)?;

        result.map_err(DbExecutorError::Database)
    }
}

/// Errors that can occur when using the write scheduler
#[derive(Debug, thiserror::Error)]
pub enum DbExecutorError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Channel closed - scheduler may have shut down")]
    ChannelClosed,

    #[error("Type mismatch in result - internal error")]
    TypeMismatch,
}
