//! Page controller.
//!
//! A [`PageSession`] lives for one page load. It owns the load timeout, the
//! cancellation signal and the install affordance, and reacts to
//! [`HostSignal`]s dispatched by the host.

mod fetch;
mod install;

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PageConfig;
use crate::error::{Error, Result};
use crate::render::{ContentRegion, View};
use crate::snapshot::SnapshotStore;
use crate::worker::WorkerRegistrar;

pub use fetch::{Fetcher, JsonResponse, ReqwestFetcher};
pub use install::{InstallAffordance, InstallOutcome, InstallPrompt, InstallState};

/// Signals the host dispatches to a page.
pub enum HostSignal {
    /// The app became installable; carries the single-use prompt handle.
    BeforeInstall(Box<dyn InstallPrompt>),
    /// The app was installed.
    Installed,
    /// All page resources finished loading.
    Load,
    /// The document finished parsing.
    ContentLoaded,
}

impl std::fmt::Debug for HostSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BeforeInstall(_) => "BeforeInstall",
            Self::Installed => "Installed",
            Self::Load => "Load",
            Self::ContentLoaded => "ContentLoaded",
        };
        f.write_str(name)
    }
}

/// Per-load page state.
pub struct PageSession {
    config: PageConfig,
    fetcher: Arc<dyn Fetcher>,
    snapshots: SnapshotStore,
    region: Arc<dyn ContentRegion>,
    registrar: Arc<dyn WorkerRegistrar>,
    install: Mutex<InstallAffordance>,
    signal: CancellationToken,
    timeout: Mutex<Option<JoinHandle<()>>>,
}

impl PageSession {
    /// Starts a session. The load timeout begins counting immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: PageConfig,
        fetcher: Arc<dyn Fetcher>,
        snapshots: SnapshotStore,
        region: Arc<dyn ContentRegion>,
        registrar: Arc<dyn WorkerRegistrar>,
    ) -> Self {
        let signal = CancellationToken::new();
        let timeout = {
            let signal = signal.clone();
            let duration = config.timeout();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                log::debug!("Load timeout of {duration:?} elapsed");
                signal.cancel();
            })
        };

        Self {
            config,
            fetcher,
            snapshots,
            region,
            registrar,
            install: Mutex::default(),
            signal,
            timeout: Mutex::new(Some(timeout)),
        }
    }

    /// The signal cancelled when the load timeout elapses.
    #[must_use]
    pub const fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// Stops the load timeout without cancelling the signal.
    pub fn clear_timeout(&self) {
        if let Some(handle) = self
            .timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Current install affordance state.
    #[must_use]
    pub fn install_state(&self) -> InstallState {
        self.affordance().state()
    }

    /// Whether the install affordance is shown and clickable.
    #[must_use]
    pub fn install_clickable(&self) -> bool {
        let affordance = self.affordance();
        affordance.is_visible() && affordance.is_enabled()
    }

    fn affordance(&self) -> std::sync::MutexGuard<'_, InstallAffordance> {
        self.install.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes a host signal to its handler.
    pub async fn dispatch(&self, signal: HostSignal) {
        log::debug!("Host signal: {signal:?}");
        match signal {
            HostSignal::BeforeInstall(handle) => self.affordance().on_installable(handle),
            HostSignal::Installed => self.affordance().on_installed(),
            HostSignal::Load => self.register_worker().await,
            HostSignal::ContentLoaded => {
                self.load_data(&self.signal).await;
                self.clear_timeout();
            }
        }
    }

    /// Handles a click on the install affordance.
    ///
    /// Does nothing when no prompt handle is held.
    pub async fn click_install(&self) {
        // Taken under the lock, prompted without it, so `Installed` can land
        // while the prompt is open.
        let Some(handle) = self.affordance().begin_prompt() else {
            return;
        };
        let result = handle.prompt().await;
        if let Ok(outcome) = &result {
            log::info!("Install prompt outcome: {outcome:?}");
        }
        self.affordance().finish_prompt(&result);
    }

    async fn register_worker(&self) {
        match self.registrar.register(&self.config.worker_script).await {
            Ok(registration) => log::info!("Worker registered: {}", registration.scope),
            Err(e) => log::warn!("Worker registration failed: {e}"),
        }
    }

    /// Fetches and renders one payload, falling back to the snapshot.
    pub async fn load_data(&self, signal: &CancellationToken) {
        self.region.render(View::Loading);

        let result = tokio::select! {
            biased;
            () = signal.cancelled() => Err(Error::Aborted),
            res = self.fetch_payload() => res,
        };

        match result {
            Ok(payload) => {
                self.region.render(View::fresh(&payload));
                if let Err(e) = self.snapshots.save(&payload) {
                    log::debug!("Snapshot not persisted: {e}");
                }
            }
            Err(e) => {
                log::warn!("Load of {} failed: {e}", self.config.api_url);
                self.render_fallback(&e);
            }
        }
    }

    async fn fetch_payload(&self) -> Result<Value> {
        let response = self.fetcher.get_json(&self.config.api_url).await?;
        if !response.is_success() {
            return Err(Error::Http {
                status: response.status,
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn render_fallback(&self, error: &Error) {
        let view = self.snapshots.load().map_or_else(
            || View::Failed(format!("Failed: {error}")),
            |snapshot| View::cached(&snapshot.data),
        );
        self.region.render(view);
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        self.clear_timeout();
    }
}
