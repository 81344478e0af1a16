//! FieldSync - offline-first persistence and sync engine for field inspections
//!
//! Field workers read and write against an embedded SQLite store while
//! offline. Every local mutation is captured in a durable outbox before it
//! commits; a sync dispatcher later replays the outbox (and a parallel media
//! queue) against the remote authoritative server. Reference and job data
//! refresh through a batched bulk-ingestion pipeline, and survey answers
//! live in a composite-keyed response store checkpointed to a key-value
//! file.

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod kv;
pub mod local;
pub mod remote;
pub mod responses;
pub mod schema;
pub mod sync;

use crate::config::EngineConfig;
use crate::db::outbox;
use crate::error::AppError;
use crate::ingest::{IngestReport, Ingestor};
use crate::kv::FileKvStore;
use crate::local::LocalDb;
use crate::remote::RemoteClient;
use crate::responses::{AnswerImage, JobContext, ResponseStore};
use crate::sync::SyncDispatcher;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Key-value flag recording that first-run setup completed
pub const DB_INITIALIZED_KEY: &str = "db_initialized";

/// The assembled engine: one database, one write scheduler, one dispatcher
pub struct SyncEngine {
    config: EngineConfig,
    local: Arc<LocalDb>,
    kv: Arc<FileKvStore>,
    responses: Arc<ResponseStore>,
    dispatcher: Arc<SyncDispatcher>,
    ingestor: Ingestor,
}

impl SyncEngine {
    /// Open the database, create tables, reload the response store, and
    /// wire up the remote client, dispatcher, and ingestor.
    pub async fn initialize(config: EngineConfig) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(config.media_dir())?;

        let local = Arc::new(LocalDb::open(&config)?);
        let kv = Arc::new(FileKvStore::open(config.kv_path())?);

        let first_run = kv.get(DB_INITIALIZED_KEY).is_none();
        // DDL is IF NOT EXISTS throughout, so a warm start is harmless
        local.create_tables().await?;
        if first_run {
            kv.set(DB_INITIALIZED_KEY, "1")?;
            info!(data_dir = %config.data_dir.display(), "database initialized");
        }

        let responses = Arc::new(ResponseStore::load(kv.clone())?);
        let remote = Arc::new(RemoteClient::new(
            &config.remote_base_url,
            config.request.clone(),
        ));
        let dispatcher = Arc::new(SyncDispatcher::new(local.clone(), remote.clone()));
        let ingestor = Ingestor::new(local.clone(), remote, config.ingest_batch_size);

        Ok(Self {
            config,
            local,
            kv,
            responses,
            dispatcher,
            ingestor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local(&self) -> &Arc<LocalDb> {
        &self.local
    }

    pub fn kv(&self) -> &Arc<FileKvStore> {
        &self.kv
    }

    pub fn responses(&self) -> &Arc<ResponseStore> {
        &self.responses
    }

    pub fn dispatcher(&self) -> &Arc<SyncDispatcher> {
        &self.dispatcher
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Refresh local data from the remote source, then run a sync pass
    /// regardless of how ingestion went (outbox entries must not wait for
    /// a clean refresh).
    pub async fn ingest_then_sync(&self, context_id: i64) -> Result<IngestReport, AppError> {
        let result = self.ingestor.ingest_all(context_id).await;

        if let Err(e) = self.dispatcher.sync_to_server().await {
            tracing::warn!(error = %e, "post-ingestion sync pass failed");
        }

        result.map_err(AppError::from)
    }

    /// Record a captured photo against a survey answer: queues it for
    /// upload and appends it to the answer's image list.
    #[allow(clippy::too_many_arguments)]
    pub async fn attach_media(
        &self,
        ctx: &JobContext,
        umr: &str,
        question_number: &str,
        nc_severity: Option<&str>,
        geostamp: Option<&str>,
        question_id: i64,
        local_path: &Path,
    ) -> Result<String, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let filename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{id}.jpg"));

        let entry = outbox::MediaEntry {
            id: id.clone(),
            parent_id: format!(
                "{}|{}|{}|{}",
                ctx.job_number, umr, question_id, ctx.survey_type
            ),
            filename: filename.clone(),
            local_path: local_path.to_string_lossy().into_owned(),
            sync_status: 0,
        };
        self.local
            .write(move |conn| outbox::queue_media(conn, &entry))
            .await
            .map_err(AppError::from)?;

        self.responses.push_image(
            ctx,
            umr,
            question_number,
            nc_severity,
            geostamp,
            question_id,
            AnswerImage {
                uri: format!("file://{}", local_path.display()),
                file_name: filename,
            },
        )?;

        Ok(id)
    }

    /// Pending outbox and media counts, for diagnostics
    pub async fn pending_counts(&self) -> Result<(i64, i64), AppError> {
        let logs = self.local.read(outbox::count_pending).await?;
        let media = self.local.read(outbox::count_pending_media).await?;
        Ok((logs, media))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_initialize_sets_flag_once() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path(), "http://127.0.0.1:1");

        let engine = SyncEngine::initialize(config.clone()).await.unwrap();
        assert_eq!(engine.kv().get(DB_INITIALIZED_KEY).as_deref(), Some("1"));
        drop(engine);

        // Warm start reuses the same database without error
        let engine = SyncEngine::initialize(config).await.unwrap();
        assert_eq!(engine.kv().get(DB_INITIALIZED_KEY).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_attach_media_queues_and_merges() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path(), "http://127.0.0.1:1");
        let engine = SyncEngine::initialize(config).await.unwrap();

        let photo = dir.path().join("crack.jpg");
        std::fs::write(&photo, b"jpeg").unwrap();

        let ctx = JobContext {
            job_number: "J-7".into(),
            survey_question_set_id: 2,
            survey_type: 1,
        };
        engine
            .attach_media(&ctx, "UMR-3", "5.1", Some("minor"), None, 12, &photo)
            .await
            .unwrap();

        let (logs, media) = engine.pending_counts().await.unwrap();
        assert_eq!(logs, 0, "media attachment is not outbox-logged");
        assert_eq!(media, 1);

        let record = engine
            .responses()
            .answer_for("J-7", "UMR-3", 12, 1)
            .unwrap();
        assert_eq!(record.images.len(), 1);
        assert_eq!(record.images[0].file_name, "crack.jpg");
    }
}
