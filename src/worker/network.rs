//! Network access for the cache worker.

use std::time::Duration;

use async_trait::async_trait;

use super::http::{Request, Response};
use crate::error::Result;

/// Performs live network fetches.
#[async_trait]
pub trait Network: Send + Sync {
    /// Sends `request` and returns whatever the server answered.
    ///
    /// Non-success statuses are responses, not errors; only transport
    /// failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestNetwork {
    client: reqwest::Client,
}

impl ReqwestNetwork {
    /// Creates a network client.
    ///
    /// Redirects are not followed so the caller sees them as responses.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
