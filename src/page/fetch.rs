//! HTTP fetcher abstraction for the page controller.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::ACCEPT;

use crate::error::Result;

/// Raw response to a JSON request.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    /// HTTP status code.
    pub status: u16,
    /// Unparsed response body.
    pub body: Bytes,
}

impl JsonResponse {
    /// Returns true if the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Issues `GET` requests asking for JSON.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url` with `accept: application/json`.
    async fn get_json(&self, url: &str) -> Result<JsonResponse>;
}

/// Default fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Creates a fetcher with a freshly configured client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn get_json(&self, url: &str) -> Result<JsonResponse> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(JsonResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        let ok = |status| JsonResponse {
            status,
            body: Bytes::new(),
        };
        assert!(ok(200).is_success());
        assert!(ok(204).is_success());
        assert!(!ok(199).is_success());
        assert!(!ok(304).is_success());
        assert!(!ok(500).is_success());
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let fetcher = ReqwestFetcher::with_client(client);
        // Port 9 (discard) is closed on test machines.
        let err = fetcher.get_json("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, crate::Error::Network(_)));
    }
}
