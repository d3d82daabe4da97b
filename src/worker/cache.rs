//! Named cache generations.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::http::{Request, Response};
use crate::error::{Error, Result};

/// Storage of named request/response caches.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the cache called `name`, creating it if needed.
    async fn open(&self, name: &str) -> Result<()>;

    /// Looks `request` up across every cache, oldest cache first.
    async fn match_request(&self, request: &Request) -> Option<Response>;

    /// Stores `response` for `request` in the cache called `name`.
    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()>;

    /// Deletes the cache called `name`. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Lists cache names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;
}

type Entries = HashMap<String, Response>;

/// Cache storage held in memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: Mutex<Vec<(String, Entries)>>,
}

impl MemoryCacheStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the cache called `name`.
    #[must_use]
    pub fn len(&self, name: &str) -> Option<usize> {
        let caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        caches
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entries)| entries.len())
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        if !caches.iter().any(|(n, _)| n == name) {
            caches.push((name.to_string(), Entries::new()));
        }
        Ok(())
    }

    async fn match_request(&self, request: &Request) -> Option<Response> {
        if request.method != Method::GET {
            return None;
        }
        let key = request.cache_key();
        let caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        caches.iter().find_map(|(_, entries)| entries.get(&key).cloned())
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
        if request.method != Method::GET {
            return Err(Error::Cache(format!(
                "cannot cache {} request {}",
                request.method, request.url
            )));
        }
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        let index = if let Some(i) = caches.iter().position(|(n, _)| n == name) {
            i
        } else {
            caches.push((name.to_string(), Entries::new()));
            caches.len() - 1
        };
        caches[index].1.insert(request.cache_key(), response);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        let before = caches.len();
        caches.retain(|(n, _)| n != name);
        Ok(caches.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(caches.iter().map(|(n, _)| n.clone()).collect())
    }
}

const INDEX_FILE: &str = "index.json";

/// Cache storage kept on disk so generations outlive the process.
///
/// Each generation is a directory named by the SHA-256 of its name, holding
/// one JSON file per entry named by the SHA-256 of the cache key. Generation
/// names are kept in creation order in `index.json`. Every file is written
/// atomically (write tmp + rename).
#[derive(Debug)]
pub struct FileCacheStorage {
    root: PathBuf,
    index: Mutex<()>,
    tmp_seq: AtomicU64,
}

/// On-disk form of a cached response.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64 of the body bytes.
    body: String,
}

impl StoredEntry {
    fn new(key: String, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();
        Self {
            key,
            status: response.status.as_u16(),
            headers,
            body: STANDARD.encode(&response.body),
        }
    }

    fn into_response(self) -> Option<Response> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let body = STANDARD.decode(&self.body).ok()?;
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        Some(Response {
            status,
            headers,
            body: body.into(),
        })
    }
}

fn digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(hash.len() * 2);
    for byte in hash.iter() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn cache_error(e: io::Error) -> Error {
    Error::Cache(e.to_string())
}

impl FileCacheStorage {
    /// Creates storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
        }
    }

    /// Root directory of this storage.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> PathBuf {
        self.root.join(digest(name))
    }

    fn entry_path(&self, name: &str, key: &str) -> PathBuf {
        self.generation_dir(name).join(format!("{}.json", digest(key)))
    }

    /// Writes atomically (write tmp + rename).
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("{seq}.tmp"));
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, path)
    }

    fn read_index(&self) -> io::Result<Vec<String>> {
        match std::fs::read(self.root.join(INDEX_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn write_index(&self, names: &[String]) -> io::Result<()> {
        let bytes = serde_json::to_vec(names)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_atomic(&self.root.join(INDEX_FILE), &bytes)
    }

    fn ensure_generation(&self, name: &str) -> io::Result<()> {
        let _guard = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        std::fs::create_dir_all(self.generation_dir(name))?;
        let mut names = self.read_index()?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            self.write_index(&names)?;
        }
        Ok(())
    }

    fn remove_generation(&self, name: &str) -> io::Result<bool> {
        let _guard = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names = self.read_index()?;
        let Some(position) = names.iter().position(|n| n == name) else {
            return Ok(false);
        };
        names.remove(position);
        self.write_index(&names)?;
        match std::fs::remove_dir_all(self.generation_dir(name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(true),
        }
    }

    fn read_entry(&self, name: &str, key: &str) -> Option<Response> {
        let bytes = std::fs::read(self.entry_path(name, key)).ok()?;
        match serde_json::from_slice::<StoredEntry>(&bytes) {
            Ok(entry) if entry.key == key => entry.into_response(),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Skipping unreadable cache entry for {key} in {name}: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl CacheStorage for FileCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.ensure_generation(name).map_err(cache_error)
    }

    async fn match_request(&self, request: &Request) -> Option<Response> {
        if request.method != Method::GET {
            return None;
        }
        let names = match self.read_index() {
            Ok(names) => names,
            Err(e) => {
                log::debug!("Cache index at {} unreadable: {e}", self.root.display());
                return None;
            }
        };
        let key = request.cache_key();
        names.iter().find_map(|name| self.read_entry(name, &key))
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
        if request.method != Method::GET {
            return Err(Error::Cache(format!(
                "cannot cache {} request {}",
                request.method, request.url
            )));
        }
        self.ensure_generation(name).map_err(cache_error)?;
        let key = request.cache_key();
        let bytes = serde_json::to_vec(&StoredEntry::new(key.clone(), &response))?;
        self.write_atomic(&self.entry_path(name, &key), &bytes)
            .map_err(cache_error)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        self.remove_generation(name).map_err(cache_error)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.read_index().map_err(cache_error)
    }
}
