//! Offline cache worker.
//!
//! Sits between clients and the network for one origin. Same-origin requests
//! are answered stale-while-revalidate from a versioned cache generation;
//! everything else passes through untouched.

mod cache;
mod http;
mod network;
mod registration;

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::try_join_all;
use reqwest::Url;
use tokio_util::task::TaskTracker;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};

pub use cache::{CacheStorage, FileCacheStorage, MemoryCacheStorage};
pub use http::{Request, RequestMode, Response};
pub use network::{Network, ReqwestNetwork};
pub use registration::{Registration, ServiceWorkerContainer, WorkerRegistrar};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this worker will never serve.
    Redundant,
}

/// What to do with an intercepted request.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Not ours; send it to the network unmodified.
    Passthrough(Request),
    /// Answer with this response.
    Respond(Response),
}

#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
    skip_waiting: bool,
    clients_claimed: bool,
}

/// Stale-while-revalidate cache worker for one origin.
pub struct OfflineCacheWorker<C: CacheStorage, N: Network> {
    origin: Url,
    config: WorkerConfig,
    caches: Arc<C>,
    network: Arc<N>,
    lifecycle: Mutex<Lifecycle>,
    revalidations: TaskTracker,
}

impl<C: CacheStorage + 'static, N: Network + 'static> OfflineCacheWorker<C, N> {
    /// Creates a worker for `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if `origin` is not an absolute URL.
    pub fn new(origin: &str, config: WorkerConfig, caches: Arc<C>, network: Arc<N>) -> Result<Self> {
        let origin = Url::parse(origin).map_err(|e| Error::Url(format!("{origin}: {e}")))?;
        Ok(Self {
            origin,
            config,
            caches,
            network,
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::Parsed,
                skip_waiting: false,
                clients_claimed: false,
            }),
            revalidations: TaskTracker::new(),
        })
    }

    /// Origin whose requests this worker answers.
    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    /// Name of the live cache generation.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.config.cache_version
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.lifecycle().state
    }

    /// Whether install asked to take over without waiting for older workers.
    #[must_use]
    pub fn skips_waiting(&self) -> bool {
        self.lifecycle().skip_waiting
    }

    /// Whether activation claimed already-open clients.
    #[must_use]
    pub fn claimed_clients(&self) -> bool {
        self.lifecycle().clients_claimed
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        self.lifecycle().state = state;
    }

    fn resolve(&self, path: &str) -> Result<Request> {
        let url = self
            .origin
            .join(path)
            .map_err(|e| Error::Url(format!("{path}: {e}")))?;
        Ok(Request::get(url))
    }

    /// Populates the current generation with the core assets.
    ///
    /// Every asset must fetch with a success status; otherwise nothing is
    /// stored and the worker becomes redundant.
    ///
    /// # Errors
    ///
    /// Returns the first fetch failure, or [`Error::Http`] for a non-success
    /// asset.
    pub async fn install(&self) -> Result<()> {
        self.set_state(WorkerState::Installing);
        match self.precache().await {
            Ok(count) => {
                let mut lifecycle = self.lifecycle();
                lifecycle.state = WorkerState::Installed;
                lifecycle.skip_waiting = true;
                drop(lifecycle);
                log::info!("Installed cache {} with {count} assets", self.version());
                Ok(())
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant);
                log::warn!("Install of cache {} failed: {e}", self.version());
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize> {
        self.caches.open(self.version()).await?;

        let requests = self
            .config
            .core_assets
            .iter()
            .map(|asset| self.resolve(asset))
            .collect::<Result<Vec<_>>>()?;

        let fetched = try_join_all(requests.into_iter().map(|request| async move {
            let response = self.network.fetch(&request).await?;
            if !response.is_success() {
                return Err(Error::Http {
                    status: response.status.as_u16(),
                });
            }
            Ok::<_, Error>((request, response))
        }))
        .await?;

        let count = fetched.len();
        for (request, response) in fetched {
            self.caches.put(self.version(), &request, response).await?;
        }
        Ok(count)
    }

    /// Deletes every cache generation but the current one and claims clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache names cannot be listed or a stale
    /// generation cannot be deleted.
    pub async fn activate(&self) -> Result<()> {
        self.set_state(WorkerState::Activating);
        for name in self.caches.keys().await? {
            if name != self.version() {
                self.caches.delete(&name).await?;
                log::info!("Deleted stale cache {name}");
            }
        }
        let mut lifecycle = self.lifecycle();
        lifecycle.clients_claimed = true;
        lifecycle.state = WorkerState::Activated;
        Ok(())
    }

    /// Decides how to answer an intercepted request.
    pub async fn handle_fetch(&self, request: Request) -> FetchDisposition {
        if request.url.origin() != self.origin.origin() {
            return FetchDisposition::Passthrough(request);
        }

        if let Some(cached) = self.caches.match_request(&request).await {
            self.revalidate(request);
            return FetchDisposition::Respond(cached);
        }

        match self.network.fetch(&request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(&request, response.clone()).await;
                }
                FetchDisposition::Respond(response)
            }
            Err(e) => {
                log::debug!("Network fetch of {} failed: {e}", request.url);
                FetchDisposition::Respond(self.offline_fallback(&request).await)
            }
        }
    }

    async fn offline_fallback(&self, request: &Request) -> Response {
        if request.wants_html() {
            if let Ok(shell) = self.resolve(&self.config.shell) {
                if let Some(page) = self.caches.match_request(&shell).await {
                    return page;
                }
            }
        }
        Response::offline()
    }

    async fn store(&self, request: &Request, response: Response) {
        if let Err(e) = self.caches.put(self.version(), request, response).await {
            log::debug!("Cache put for {} failed: {e}", request.url);
        }
    }

    /// Refreshes the cached entry for `request` in the background.
    fn revalidate(&self, request: Request) {
        let caches = Arc::clone(&self.caches);
        let network = Arc::clone(&self.network);
        let version = self.config.cache_version.clone();
        self.revalidations.spawn(async move {
            match network.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = caches.put(&version, &request, response).await {
                        log::debug!("Revalidation put for {} failed: {e}", request.url);
                    }
                }
                Ok(response) => {
                    log::debug!("Revalidation of {} returned {}", request.url, response.status);
                }
                Err(e) => log::debug!("Revalidation of {} failed: {e}", request.url),
            }
        });
    }

    /// Waits for all in-flight background revalidations to finish.
    pub async fn drain(&self) {
        self.revalidations.close();
        self.revalidations.wait().await;
        self.revalidations.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use reqwest::StatusCode;

    const ORIGIN: &str = "http://app.test/";

    /// Network serving a fixed set of bodies keyed by URL.
    #[derive(Default)]
    struct FakeNetwork {
        pages: Mutex<HashMap<String, Response>>,
        offline: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeNetwork {
        fn serve(&self, url: &str, status: StatusCode, body: &'static str) {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), Response::new(status, body));
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::Network("offline".into()));
            }
            Ok(self
                .pages
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND, "missing")))
        }
    }

    type TestWorker = OfflineCacheWorker<MemoryCacheStorage, FakeNetwork>;

    fn worker_with(assets: &[&str]) -> (TestWorker, Arc<MemoryCacheStorage>, Arc<FakeNetwork>) {
        let caches = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(FakeNetwork::default());
        let config = WorkerConfig::new()
            .with_cache_version("v2")
            .with_core_assets(assets.iter().copied());
        let worker =
            OfflineCacheWorker::new(ORIGIN, config, Arc::clone(&caches), Arc::clone(&network))
                .unwrap();
        (worker, caches, network)
    }

    fn req(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    fn respond(disposition: FetchDisposition) -> Response {
        match disposition {
            FetchDisposition::Respond(response) => response,
            FetchDisposition::Passthrough(request) => panic!("unexpected passthrough of {}", request.url),
        }
    }

    #[tokio::test]
    async fn install_precaches_core_assets() {
        let (worker, caches, network) = worker_with(&["./", "index.html", "app.js"]);
        network.serve("http://app.test/", StatusCode::OK, "root");
        network.serve("http://app.test/index.html", StatusCode::OK, "<html>");
        network.serve("http://app.test/app.js", StatusCode::OK, "js");

        worker.install().await.unwrap();

        assert_eq!(worker.state(), WorkerState::Installed);
        assert!(worker.skips_waiting());
        assert_eq!(caches.len("v2"), Some(3));
        assert_eq!(
            caches.match_request(&req("http://app.test/app.js")).await.unwrap().body,
            "js"
        );
    }

    #[tokio::test]
    async fn install_is_all_or_nothing() {
        let (worker, caches, network) = worker_with(&["index.html", "missing.png"]);
        network.serve("http://app.test/index.html", StatusCode::OK, "<html>");

        let err = worker.install().await.unwrap_err();

        assert!(matches!(err, Error::Http { status: 404 }));
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert_eq!(caches.len("v2"), Some(0));
    }

    #[tokio::test]
    async fn install_fails_offline() {
        let (worker, _, network) = worker_with(&["index.html"]);
        network.set_offline(true);
        assert!(matches!(worker.install().await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn activate_keeps_only_current_generation() {
        let (worker, caches, _) = worker_with(&[]);
        caches.open("v0").await.unwrap();
        caches.open("v1").await.unwrap();
        caches.open("v2").await.unwrap();
        caches.open("other-app").await.unwrap();

        worker.activate().await.unwrap();

        assert_eq!(caches.keys().await.unwrap(), vec!["v2"]);
        assert_eq!(worker.state(), WorkerState::Activated);
        assert!(worker.claimed_clients());
    }

    #[tokio::test]
    async fn cross_origin_passes_through() {
        let (worker, _, network) = worker_with(&[]);
        let request = req("https://dog.ceo/api/breeds/image/random").with_accept("application/json");

        let FetchDisposition::Passthrough(passed) = worker.handle_fetch(request).await else {
            panic!("cross-origin request was intercepted");
        };
        assert_eq!(passed.url.as_str(), "https://dog.ceo/api/breeds/image/random");
        assert_eq!(passed.headers.get("accept").unwrap(), "application/json");
        assert_eq!(network.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_hit_returns_cached_then_revalidates() {
        let (worker, caches, network) = worker_with(&[]);
        let request = req("http://app.test/app.js");
        caches
            .put("v2", &request, Response::new(StatusCode::OK, "stale"))
            .await
            .unwrap();
        network.serve("http://app.test/app.js", StatusCode::OK, "fresh");

        let response = respond(worker.handle_fetch(request.clone()).await);
        assert_eq!(response.body, "stale");

        worker.drain().await;
        assert_eq!(caches.match_request(&request).await.unwrap().body, "fresh");
    }

    #[tokio::test]
    async fn cache_hit_survives_network_failure() {
        let (worker, caches, network) = worker_with(&[]);
        let request = req("http://app.test/app.js");
        caches
            .put("v2", &request, Response::new(StatusCode::OK, "stale"))
            .await
            .unwrap();
        network.set_offline(true);

        let response = respond(worker.handle_fetch(request.clone()).await);
        assert_eq!(response.body, "stale");

        worker.drain().await;
        assert_eq!(caches.match_request(&request).await.unwrap().body, "stale");
    }

    #[tokio::test]
    async fn revalidation_ignores_error_status() {
        let (worker, caches, _) = worker_with(&[]);
        let request = req("http://app.test/gone.js");
        caches
            .put("v2", &request, Response::new(StatusCode::OK, "kept"))
            .await
            .unwrap();

        let _ = worker.handle_fetch(request.clone()).await;
        worker.drain().await;

        assert_eq!(caches.match_request(&request).await.unwrap().body, "kept");
    }

    #[tokio::test]
    async fn miss_fetches_and_stores() {
        let (worker, caches, network) = worker_with(&[]);
        network.serve("http://app.test/data.json", StatusCode::OK, "{}");

        let response = respond(worker.handle_fetch(req("http://app.test/data.json")).await);

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            caches.match_request(&req("http://app.test/data.json")).await.unwrap().body,
            "{}"
        );
    }

    #[tokio::test]
    async fn miss_with_error_status_is_returned_but_not_stored() {
        let (worker, caches, _) = worker_with(&[]);

        let response = respond(worker.handle_fetch(req("http://app.test/nope")).await);

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(caches.match_request(&req("http://app.test/nope")).await.is_none());
    }

    #[tokio::test]
    async fn offline_navigation_gets_shell() {
        let (worker, caches, network) = worker_with(&[]);
        caches
            .put("v2", &req("http://app.test/index.html"), Response::new(StatusCode::OK, "<shell>"))
            .await
            .unwrap();
        network.set_offline(true);

        let navigate = req("http://app.test/some/page").with_mode(RequestMode::Navigate);
        assert_eq!(respond(worker.handle_fetch(navigate).await).body, "<shell>");

        let html = req("http://app.test/other").with_accept("text/html");
        assert_eq!(respond(worker.handle_fetch(html).await).body, "<shell>");
    }

    #[tokio::test]
    async fn offline_asset_gets_503() {
        let (worker, _, network) = worker_with(&[]);
        network.set_offline(true);

        let response = respond(worker.handle_fetch(req("http://app.test/app.js")).await);

        assert_eq!(response, Response::offline());
    }

    #[tokio::test]
    async fn offline_navigation_without_shell_gets_503() {
        let (worker, _, network) = worker_with(&[]);
        network.set_offline(true);

        let navigate = req("http://app.test/").with_mode(RequestMode::Navigate);
        assert_eq!(respond(worker.handle_fetch(navigate).await), Response::offline());
    }

    #[tokio::test]
    async fn non_get_miss_is_not_cached() {
        let (worker, caches, network) = worker_with(&[]);
        network.serve("http://app.test/form", StatusCode::OK, "posted");
        let mut request = req("http://app.test/form");
        request.method = reqwest::Method::POST;

        let response = respond(worker.handle_fetch(request).await);

        assert_eq!(response.body, "posted");
        assert_eq!(caches.len("v2"), None);
    }

    #[tokio::test]
    async fn install_activate_serve_offline() {
        let (worker, caches, network) = worker_with(&["index.html", "app.js"]);
        network.serve("http://app.test/index.html", StatusCode::OK, "<shell>");
        network.serve("http://app.test/app.js", StatusCode::OK, "js");
        caches.open("v1").await.unwrap();

        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        network.set_offline(true);

        assert_eq!(caches.keys().await.unwrap(), vec!["v2"]);
        assert_eq!(respond(worker.handle_fetch(req("http://app.test/app.js")).await).body, "js");
        let navigate = req("http://app.test/deep/link").with_mode(RequestMode::Navigate);
        assert_eq!(respond(worker.handle_fetch(navigate).await).body, "<shell>");
    }

    #[tokio::test]
    async fn new_version_purges_generation_left_by_previous_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let network = Arc::new(FakeNetwork::default());
        network.serve("http://app.test/index.html", StatusCode::OK, "<old shell>");

        let start = |version: &str| {
            OfflineCacheWorker::new(
                ORIGIN,
                WorkerConfig::new()
                    .with_cache_version(version)
                    .with_core_assets(["index.html"]),
                Arc::new(FileCacheStorage::new(dir.path())),
                Arc::clone(&network),
            )
            .unwrap()
        };

        let first = start("v1");
        first.install().await.unwrap();
        first.activate().await.unwrap();
        drop(first);

        network.serve("http://app.test/index.html", StatusCode::OK, "<new shell>");
        let second = start("v2");
        second.install().await.unwrap();
        second.activate().await.unwrap();

        let caches = FileCacheStorage::new(dir.path());
        assert_eq!(caches.keys().await.unwrap(), vec!["v2"]);

        network.set_offline(true);
        let navigate = req("http://app.test/").with_mode(RequestMode::Navigate);
        assert_eq!(respond(second.handle_fetch(navigate).await).body, "<new shell>");
    }
}
