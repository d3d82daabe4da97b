//! Configuration types for the page controller, cache worker and proxy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default endpoint returning `{ "message": <image url>, "status": "success" }`.
pub const DEFAULT_API_URL: &str = "https://dog.ceo/api/breeds/image/random";

/// Configuration for the page controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Endpoint fetched on every load.
    pub api_url: String,
    /// Seconds before the initial load is aborted.
    pub timeout_secs: u64,
    /// Key the last successful payload is stored under.
    pub snapshot_key: String,
    /// Origin the page is served from; worker scripts resolve against it.
    pub origin: String,
    /// Worker script path, relative to `origin`.
    pub worker_script: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 10,
            snapshot_key: "lastDogData".to_string(),
            origin: "http://127.0.0.1:8080/".to_string(),
            worker_script: "sw.js".to_string(),
        }
    }
}

impl PageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the load timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Sets the load timeout in seconds.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the snapshot storage key.
    #[must_use]
    pub fn with_snapshot_key(mut self, key: impl Into<String>) -> Self {
        self.snapshot_key = key.into();
        self
    }

    /// Sets the page origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }
}

/// Configuration for the offline cache worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the live cache generation.
    pub cache_version: String,
    /// Assets fetched and cached on install, relative to the worker origin.
    pub core_assets: Vec<String>,
    /// Shell page served to offline navigations.
    pub shell: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_version: "randimg-v2".to_string(),
            core_assets: [
                "./",
                "index.html",
                "app.js",
                "manifest.webmanifest",
                "images/tim.jpg",
                "images/icons/tim192.png",
                "images/icons/tim512.png",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            shell: "index.html".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache generation name.
    #[must_use]
    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Sets the core asset manifest.
    #[must_use]
    pub fn with_core_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.core_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the offline shell page.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

/// Path configuration for persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory backing the snapshot key-value store.
    pub state_dir: PathBuf,
    /// Directory holding the proxy's cache generations.
    pub cache_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        // Honour systemd's StateDirectory= when running as a service.
        let base = std::env::var("STATE_DIRECTORY").map_or_else(
            |_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("randimg")
            },
            PathBuf::from,
        );
        Self {
            state_dir: base.join("storage"),
            cache_dir: base.join("caches"),
        }
    }
}

/// Caching proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origin the proxy fronts.
    pub upstream: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            upstream: "http://127.0.0.1:8000/".to_string(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Page controller configuration.
    pub page: PageConfig,
    /// Cache worker configuration.
    pub worker: WorkerConfig,
    /// Path configuration.
    pub paths: PathConfig,
    /// Proxy configuration.
    pub server: ServerConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the default config file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("randimg")
            .join("config.toml")
    }

    /// Loads configuration from the default location, falling back to
    /// defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> crate::Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Loads configuration from an explicit TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
