//! Error types for the randimg library.

use thiserror::Error;

/// Errors that can occur while loading content or serving cached requests.
#[derive(Error, Debug)]
pub enum Error {
    /// Connectivity, DNS or TLS failure.
    #[error("{0}")]
    Network(String),

    /// The server answered with a non-success status code.
    #[error("HTTP {status}")]
    Http {
        /// Status code returned by the server.
        status: u16,
    },

    /// The response body was not valid JSON.
    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// The request was cancelled before it completed.
    #[error("Request aborted")]
    Aborted,

    /// Key-value storage is unavailable or over quota.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cache storage rejected an operation.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Worker registration failed.
    #[error("Worker registration failed: {0}")]
    Registration(String),

    /// A URL could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    Url(String),

    /// Configuration file could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl Error {
    /// Returns true if this error is a cancellation.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// A specialized `Result` type for randimg operations.
pub type Result<T> = std::result::Result<T, Error>;
