//! Worker registration.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::Url;

use crate::error::{Error, Result};

/// A registered worker script and the URL scope it controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub scope: Url,
    pub script_url: Url,
}

/// Registers worker scripts on behalf of a page.
#[async_trait]
pub trait WorkerRegistrar: Send + Sync {
    /// Registers the script at `script`, relative to the page origin.
    async fn register(&self, script: &str) -> Result<Registration>;
}

/// Registration table for one page origin.
#[derive(Debug)]
pub struct ServiceWorkerContainer {
    origin: Url,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl ServiceWorkerContainer {
    /// Creates a container for pages served from `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if `origin` is not an absolute URL.
    pub fn new(origin: &str) -> Result<Self> {
        let origin = Url::parse(origin).map_err(|e| Error::Url(format!("{origin}: {e}")))?;
        Ok(Self {
            origin,
            registrations: Mutex::default(),
        })
    }

    /// Returns the registration whose scope is the longest prefix of `url`.
    #[must_use]
    pub fn registration_for(&self, url: &Url) -> Option<Registration> {
        let registrations = self.registrations.lock().unwrap_or_else(PoisonError::into_inner);
        registrations
            .values()
            .filter(|r| url.as_str().starts_with(r.scope.as_str()))
            .max_by_key(|r| r.scope.as_str().len())
            .cloned()
    }

    /// Number of active registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WorkerRegistrar for ServiceWorkerContainer {
    async fn register(&self, script: &str) -> Result<Registration> {
        let script_url = self
            .origin
            .join(script)
            .map_err(|e| Error::Registration(format!("{script}: {e}")))?;
        if script_url.origin() != self.origin.origin() {
            return Err(Error::Registration(format!(
                "script {script_url} is not same-origin with {}",
                self.origin
            )));
        }
        // Default scope is the directory containing the script.
        let scope = script_url
            .join("./")
            .map_err(|e| Error::Registration(e.to_string()))?;

        let registration = Registration { scope, script_url };
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(registration.scope.to_string(), registration.clone());
        Ok(registration)
    }
}
