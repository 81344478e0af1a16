//! Persistent key-value store
//!
//! A small file-backed string map used for the response-store checkpoint,
//! the database-initialized flag, and scanned server configuration. Every
//! set/remove rewrites the whole file through a temp-file rename, so a
//! crash mid-write never leaves a torn checkpoint. There is no
//! transactional guarantee across keys.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct FileKvStore {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl FileKvStore {
    /// Open the store, loading existing state if the file is present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let map = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.map.lock();
        map.insert(key.to_string(), value.to_string());
        self.flush(&map)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.map.lock();
        map.remove(key);
        self.flush(&map)
    }

    /// Write-through: serialize to a sibling temp file, then rename over
    /// the real one.
    fn flush(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(map)?)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}
