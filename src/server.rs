//! Local caching proxy driven by the offline cache worker.
//!
//! Every request reaching the proxy is rewritten onto the upstream origin and
//! handed to [`OfflineCacheWorker::handle_fetch`]. The proxy only fronts the
//! upstream: absolute-form targets naming another origin come back from the
//! worker as passthroughs and are refused.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request as AxumRequest, State};
use axum::http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use reqwest::Url;
use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::worker::{
    CacheStorage, FetchDisposition, FileCacheStorage, Network, OfflineCacheWorker, Request,
    RequestMode, ReqwestNetwork, Response,
};

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Builds the proxy router around a worker.
pub fn router<C, N>(worker: Arc<OfflineCacheWorker<C, N>>) -> Router
where
    C: CacheStorage + 'static,
    N: Network + 'static,
{
    Router::new().fallback(proxy::<C, N>).with_state(worker)
}

async fn proxy<C, N>(
    State(worker): State<Arc<OfflineCacheWorker<C, N>>>,
    request: AxumRequest,
) -> AxumResponse
where
    C: CacheStorage + 'static,
    N: Network + 'static,
{
    let request = match to_worker_request(worker.origin(), request).await {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match worker.handle_fetch(request).await {
        FetchDisposition::Respond(response) => into_axum_response(response),
        FetchDisposition::Passthrough(request) => {
            log::warn!("Refusing cross-origin target {} {}", request.method, request.url);
            (StatusCode::FORBIDDEN, "Cross-origin target refused").into_response()
        }
    }
}

/// Maps an incoming request onto `origin`.
///
/// Absolute-form targets (forward-proxy style) keep their own origin.
async fn to_worker_request(origin: &Url, request: AxumRequest) -> Result<Request> {
    let (parts, body) = request.into_parts();

    let url = if parts.uri.scheme().is_some() {
        Url::parse(&parts.uri.to_string())
    } else {
        let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        origin.join(target)
    }
    .map_err(|e| Error::Url(format!("{}: {e}", parts.uri)))?;

    let mode = if parts
        .headers
        .get("sec-fetch-mode")
        .is_some_and(|v| v.as_bytes() == b"navigate")
    {
        RequestMode::Navigate
    } else {
        RequestMode::SameOrigin
    };

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(Request {
        method: parts.method,
        url,
        headers: strip_hop_headers(parts.headers),
        mode,
        body: (!body.is_empty()).then_some(body),
    })
}

fn strip_hop_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in [HOST, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING] {
        headers.remove(name);
    }
    headers
}

fn into_axum_response(response: Response) -> AxumResponse {
    let mut out = AxumResponse::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = strip_hop_headers(response.headers);
    out
}

/// Serves `worker` on `listener` until `shutdown` resolves.
///
/// Stops accepting connections, lets open ones finish, then waits for the
/// worker's background revalidations before returning.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve<C, N>(
    listener: TcpListener,
    worker: Arc<OfflineCacheWorker<C, N>>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()>
where
    C: CacheStorage + 'static,
    N: Network + 'static,
{
    axum::serve(listener, router(Arc::clone(&worker)))
        .with_graceful_shutdown(shutdown)
        .await?;

    log::info!("Draining background revalidations");
    worker.drain().await;
    Ok(())
}

/// Runs the caching proxy until Ctrl-C.
///
/// The worker is installed and activated before serving; an install failure
/// (upstream down) is logged and the proxy serves whatever is cached from
/// earlier runs.
///
/// # Errors
///
/// Returns an error if the worker cannot be created, stale generations
/// cannot be purged, or the listener cannot bind.
pub async fn run(config: AppConfig) -> Result<()> {
    let network = Arc::new(ReqwestNetwork::new()?);
    let caches = Arc::new(FileCacheStorage::new(&config.paths.cache_dir));
    let worker = Arc::new(OfflineCacheWorker::new(
        &config.server.upstream,
        config.worker.clone(),
        caches,
        network,
    )?);

    if let Err(e) = worker.install().await {
        log::warn!("Serving without precache: {e}");
    }
    worker.activate().await?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| Error::Url(format!("{}:{}: {e}", config.server.host, config.server.port)))?;
    let listener = TcpListener::bind(addr).await?;
    log::info!(
        "Proxying {} on http://{addr} (cache at {})",
        config.server.upstream,
        config.paths.cache_dir.display()
    );

    serve(listener, worker, async {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("Received SIGINT");
    })
    .await?;

    log::info!("Shutdown complete");
    Ok(())
}
