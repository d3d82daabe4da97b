//! Last-known-good snapshot persistence.
//!
//! A [`SnapshotStore`] keeps the most recent successful payload under a
//! single key of a [`KeyValueStore`]. Writes overwrite; nothing is ever
//! deleted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend is unavailable or full.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// Key-value store keeping one file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Creates a store rooted at `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn item_path(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.item_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    /// Writes atomically (write tmp + rename).
    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.dir)?;
            let path = self.item_path(key);
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, value)?;
            std::fs::rename(&tmp_path, &path)
        };
        write().map_err(|e| Error::Storage(e.to_string()))
    }
}

/// In-memory key-value store, optionally bounded by a byte quota.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryKeyValueStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects values larger than `bytes`.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            items: Mutex::default(),
            quota: Some(bytes),
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        if self.quota.is_some_and(|quota| value.len() > quota) {
            return Err(Error::Storage("quota exceeded".to_string()));
        }
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The last successful payload and when it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Fetch time in milliseconds since the Unix epoch.
    pub t: i64,
    /// The payload as received.
    pub data: Value,
}

impl Snapshot {
    /// Creates a snapshot of `data` stamped with the current time.
    #[must_use]
    pub fn now(data: Value) -> Self {
        Self {
            t: Utc::now().timestamp_millis(),
            data,
        }
    }
}

/// Reads and writes the snapshot under a fixed key.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl SnapshotStore {
    /// Creates a snapshot store over `store` using `key`.
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Overwrites the snapshot with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying write fails.
    pub fn save(&self, data: &Value) -> Result<()> {
        let json = serde_json::to_string(&Snapshot::now(data.clone()))?;
        self.store.set_item(&self.key, &json)
    }

    /// Returns the stored snapshot.
    ///
    /// An unreadable store or a malformed stored value is reported as no
    /// snapshot.
    #[must_use]
    pub fn load(&self) -> Option<Snapshot> {
        let raw = match self.store.get_item(&self.key) {
            Ok(raw) => raw?,
            Err(e) => {
                log::debug!("Snapshot read failed: {e}");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| log::debug!("Ignoring malformed snapshot: {e}"))
            .ok()
    }
}
