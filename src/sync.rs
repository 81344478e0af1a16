//! Sync dispatcher
//!
//! Drains the outbox and the media queue against the remote API. At most
//! one pass runs at a time: an invocation that finds a pass in flight
//! returns immediately instead of queuing (callers re-trigger). Delivery is
//! at-least-once; the remote replay endpoint must tolerate redelivery of
//! the same literal statement after a false-negative network failure.

use crate::db::{outbox, DbError};
use crate::local::LocalDb;
use crate::remote::RemoteClient;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Totals for one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub replayed: usize,
    pub replay_failures: usize,
    pub media_uploaded: usize,
    pub media_failures: usize,
}

/// Result of a sync invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A full pass ran
    Completed(SyncReport),
    /// Another pass was in flight; nothing was done
    AlreadyRunning,
}

pub struct SyncDispatcher {
    local: Arc<LocalDb>,
    remote: Arc<RemoteClient>,
    syncing: AtomicBool,
    logs_changed: watch::Sender<u64>,
}

impl SyncDispatcher {
    pub fn new(local: Arc<LocalDb>, remote: Arc<RemoteClient>) -> Self {
        let (logs_changed, _) = watch::channel(0);
        Self {
            local,
            remote,
            syncing: AtomicBool::new(false),
            logs_changed,
        }
    }

    /// Observe outbox-drain notifications; the value increments every time
    /// a replayed entry is deleted.
    pub fn subscribe_logs_changed(&self) -> watch::Receiver<u64> {
        self.logs_changed.subscribe()
    }

    /// Replay pending outbox entries, then upload pending media.
    ///
    /// Re-entrancy guarded: overlapping invocations are no-ops. New rows
    /// created while a pass is in flight are picked up on the next pass.
    pub async fn sync_to_server(&self) -> Result<SyncOutcome, SyncError> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        }

        let result = self.drain().await;
        self.syncing.store(false, Ordering::SeqCst);

        result.map(SyncOutcome::Completed)
    }

    async fn drain(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        // Outbox: oldest first; one bad row never aborts the pass
        let entries = self.local.read(outbox::pending).await?;
        for entry in &entries {
            match self.remote.replay(&entry.statement).await {
                Ok(()) => {
                    let id = entry.id;
                    self.local.write(move |conn| outbox::delete_log(conn, id)).await?;
                    report.replayed += 1;
                    self.notify_logs_changed();
                }
                Err(e) => {
                    warn!(id = entry.id, error = %e, "replay failed, leaving entry for next pass");
                    report.replay_failures += 1;
                }
            }
        }

        // Media: parallel queue, status flag instead of deletion
        let media = self.local.read(outbox::pending_media).await?;
        for item in &media {
            match self
                .remote
                .upload_media(Path::new(&item.local_path), &item.filename)
                .await
            {
                Ok(()) => {
                    let id = item.id.clone();
                    self.local
                        .write(move |conn| outbox::mark_media_synced(conn, &id))
                        .await?;
                    report.media_uploaded += 1;
                }
                Err(e) => {
                    warn!(id = %item.id, error = %e, "media upload failed, leaving entry for next pass");
                    report.media_failures += 1;
                }
            }
        }

        if report != SyncReport::default() {
            info!(
                replayed = report.replayed,
                replay_failures = report.replay_failures,
                media_uploaded = report.media_uploaded,
                media_failures = report.media_failures,
                "sync pass complete"
            );
        }
        Ok(report)
    }

    fn notify_logs_changed(&self) {
        self.logs_changed.send_modify(|n| *n += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;
    use crate::db::retry::RetryPolicy;
    use crate::db::SqlValue;
    use std::io::Read;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Stub {
        stop: Arc<AtomicBool>,
        requests: Arc<AtomicUsize>,
        handle: std::thread::JoinHandle<()>,
        port: u16,
    }

    impl Stub {
        /// Respond to every request with a fixed status
        fn start(status: u16) -> Self {
            let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
            let port = server.server_addr().to_ip().unwrap().port();
            let stop = Arc::new(AtomicBool::new(false));
            let requests = Arc::new(AtomicUsize::new(0));

            let thread_stop = stop.clone();
            let thread_requests = requests.clone();
            let handle = std::thread::spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(mut request)) => {
                            let mut body = String::new();
                            let _ = request.as_reader().read_to_string(&mut body);
                            thread_requests.fetch_add(1, Ordering::SeqCst);
                            let _ = request.respond(
                                tiny_http::Response::from_string("").with_status_code(status),
                            );
                        }
                        _ => continue,
                    }
                }
            });

            Self {
                stop,
                requests,
                handle,
                port,
            }
        }

        fn base_url(&self) -> String {
            format!("http://127.0.0.1:{}", self.port)
        }

        fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        fn shutdown(self) {
            self.stop.store(true, Ordering::SeqCst);
            let _ = self.handle.join();
        }
    }

    async fn test_dispatcher(base_url: &str) -> (SyncDispatcher, Arc<LocalDb>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(
            LocalDb::open_at(&dir.path().join("test.db"), RetryPolicy::default()).unwrap(),
        );
        local.create_tables().await.unwrap();

        let remote = Arc::new(RemoteClient::new(
            base_url,
            RequestConfig {
                timeout_secs: 5,
                max_retries: 0,
                retry_delay_ms: 1,
            },
        ));
        (SyncDispatcher::new(local.clone(), remote), local, dir)
    }

    #[tokio::test]
    async fn test_drain_deletes_acknowledged_rows() {
        let stub = Stub::start(200);
        let (dispatcher, local, _dir) = test_dispatcher(&stub.base_url()).await;

        local
            .mutate(
                "INSERT INTO inspection_jobs (job_number) VALUES (?)",
                vec![SqlValue::from("J-1")],
            )
            .await
            .unwrap();
        local
            .mutate(
                "INSERT INTO inspection_jobs (job_number) VALUES (?)",
                vec![SqlValue::from("J-2")],
            )
            .await
            .unwrap();

        let outcome = dispatcher.sync_to_server().await.unwrap();
        match outcome {
            SyncOutcome::Completed(report) => {
                assert_eq!(report.replayed, 2);
                assert_eq!(report.replay_failures, 0);
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        assert_eq!(local.read(outbox::count_pending).await.unwrap(), 0);
        stub.shutdown();
    }

    #[tokio::test]
    async fn test_second_drain_is_noop() {
        let stub = Stub::start(200);
        let (dispatcher, local, _dir) = test_dispatcher(&stub.base_url()).await;

        local
            .mutate(
                "INSERT INTO inspection_jobs (job_number) VALUES (?)",
                vec![SqlValue::from("J-1")],
            )
            .await
            .unwrap();

        dispatcher.sync_to_server().await.unwrap();
        let first_requests = stub.request_count();
        assert_eq!(first_requests, 1);

        let outcome = dispatcher.sync_to_server().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Completed(SyncReport::default()));
        assert_eq!(stub.request_count(), first_requests, "no-op pass must not replay");
        stub.shutdown();
    }

    #[tokio::test]
    async fn test_failed_replay_leaves_row() {
        let stub = Stub::start(500);
        let (dispatcher, local, _dir) = test_dispatcher(&stub.base_url()).await;

        local
            .mutate(
                "INSERT INTO inspection_jobs (job_number) VALUES (?)",
                vec![SqlValue::from("J-1")],
            )
            .await
            .unwrap();

        let outcome = dispatcher.sync_to_server().await.unwrap();
        match outcome {
            SyncOutcome::Completed(report) => {
                assert_eq!(report.replayed, 0);
                assert_eq!(report.replay_failures, 1);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(local.read(outbox::count_pending).await.unwrap(), 1);
        stub.shutdown();
    }

    #[tokio::test]
    async fn test_reentrant_guard_skips_without_network() {
        let stub = Stub::start(200);
        let (dispatcher, local, _dir) = test_dispatcher(&stub.base_url()).await;

        local
            .mutate(
                "INSERT INTO inspection_jobs (job_number) VALUES (?)",
                vec![SqlValue::from("J-1")],
            )
            .await
            .unwrap();

        // Simulate a pass in flight
        dispatcher.syncing.store(true, Ordering::SeqCst);

        let outcome = dispatcher.sync_to_server().await.unwrap();
        assert_eq!(outcome, SyncOutcome::AlreadyRunning);
        assert_eq!(stub.request_count(), 0, "guarded call must not touch the network");

        // Guard released by the (simulated) in-flight pass, not by the skip
        assert!(dispatcher.syncing.load(Ordering::SeqCst));
        dispatcher.syncing.store(false, Ordering::SeqCst);

        let outcome = dispatcher.sync_to_server().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
        stub.shutdown();
    }

    #[tokio::test]
    async fn test_media_upload_flips_status() {
        let stub = Stub::start(200);
        let (dispatcher, local, dir) = test_dispatcher(&stub.base_url()).await;

        let photo = dir.path().join("p.jpg");
        std::fs::write(&photo, b"jpegdata").unwrap();

        let entry = outbox::MediaEntry {
            id: "m-1".into(),
            parent_id: "J-1|U-1|5|1".into(),
            filename: "p.jpg".into(),
            local_path: photo.to_string_lossy().into_owned(),
            sync_status: 0,
        };
        local
            .write(move |conn| outbox::queue_media(conn, &entry))
            .await
            .unwrap();

        let outcome = dispatcher.sync_to_server().await.unwrap();
        match outcome {
            SyncOutcome::Completed(report) => assert_eq!(report.media_uploaded, 1),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(local.read(outbox::count_pending_media).await.unwrap(), 0);
        stub.shutdown();
    }

    #[tokio::test]
    async fn test_failed_media_upload_keeps_pending() {
        let stub = Stub::start(503);
        let (dispatcher, local, dir) = test_dispatcher(&stub.base_url()).await;

        let photo = dir.path().join("p.jpg");
        std::fs::write(&photo, b"jpegdata").unwrap();

        let entry = outbox::MediaEntry {
            id: "m-1".into(),
            parent_id: "J-1|U-1|5|1".into(),
            filename: "p.jpg".into(),
            local_path: photo.to_string_lossy().into_owned(),
            sync_status: 0,
        };
        local
            .write(move |conn| outbox::queue_media(conn, &entry))
            .await
            .unwrap();

        let outcome = dispatcher.sync_to_server().await.unwrap();
        match outcome {
            SyncOutcome::Completed(report) => {
                assert_eq!(report.media_uploaded, 0);
                assert_eq!(report.media_failures, 1);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(local.read(outbox::count_pending_media).await.unwrap(), 1);
        stub.shutdown();
    }

    #[tokio::test]
    async fn test_logs_changed_notification() {
        let stub = Stub::start(200);
        let (dispatcher, local, _dir) = test_dispatcher(&stub.base_url()).await;
        let rx = dispatcher.subscribe_logs_changed();

        local
            .mutate(
                "INSERT INTO inspection_jobs (job_number) VALUES (?)",
                vec![SqlValue::from("J-1")],
            )
            .await
            .unwrap();

        dispatcher.sync_to_server().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        stub.shutdown();
    }
}
