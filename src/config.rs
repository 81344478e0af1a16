//! Engine configuration for FieldSync

use crate::db::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of rows per batched upsert statement
pub const DEFAULT_INGEST_BATCH_SIZE: usize = 200;

/// Remote request configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Number of retries for transient errors (default: 2)
    pub max_retries: u32,
    /// Retry delay in milliseconds (default: 1000)
    pub retry_delay_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

/// Engine configuration
///
/// All paths derive from `data_dir`; the default lives under the platform
/// data directory. Loadable from a JSON file for automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the database, KV checkpoint, and captured media
    pub data_dir: PathBuf,
    /// Base URL of the remote sync API
    pub remote_base_url: String,
    /// Remote request tunables
    #[serde(default)]
    pub request: RequestConfig,
    /// Lock-retry tunables for the embedded database
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Rows per batched upsert statement during ingestion
    #[serde(default = "default_batch_size")]
    pub ingest_batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_INGEST_BATCH_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: get_app_data_dir(),
            remote_base_url: "http://localhost:8080".to_string(),
            request: RequestConfig::default(),
            retry: RetryPolicy::default(),
            ingest_batch_size: DEFAULT_INGEST_BATCH_SIZE,
        }
    }
}

impl EngineConfig {
    /// Create a config rooted at an explicit data directory
    pub fn new(data_dir: impl Into<PathBuf>, remote_base_url: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            remote_base_url: remote_base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Load from `FIELDSYNC_CONFIG` or the default location, falling back
    /// to defaults when no file exists
    pub fn load_or_default() -> Self {
        let path = std::env::var_os("FIELDSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| get_app_data_dir().join("config.json"));
        match Self::load(&path) {
            Ok(config) => config,
            Err(_) => Self::default(),
        }
    }

    /// Path of the embedded database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("fieldsync.db")
    }

    /// Path of the key-value checkpoint store
    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join("fieldsync-kv.json")
    }

    /// Directory for locally captured media awaiting upload
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }
}

/// Get the application data directory
pub fn get_app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("FieldSync")
}
