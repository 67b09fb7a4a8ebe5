//! Outbound network transport

use crate::error::{OfflineError, Result};
use crate::models::{FetchRequest, HttpResponse};
use async_trait::async_trait;
use http::header::{HeaderValue, CACHE_CONTROL, HOST, PRAGMA};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// How a fetch may use intermediate HTTP caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Default transport behaviour
    #[default]
    Default,
    /// Bypass any intermediate cache and force revalidation with the origin
    NoStore,
}

/// Per-fetch options
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub cache_mode: CacheMode,
}

impl FetchOptions {
    pub fn no_store() -> Self {
        FetchOptions {
            cache_mode: CacheMode::NoStore,
        }
    }
}

/// The network as seen by the cache controller
///
/// `fetch` resolves with whatever response the origin produced, 4xx and 5xx
/// included; only transport failures are errors.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest, options: &FetchOptions) -> Result<HttpResponse>;

    /// Turn on navigation preload, if the transport offers it
    async fn enable_navigation_preload(&self) -> Result<()> {
        Err(OfflineError::Unsupported("navigation preload".to_string()))
    }
}

/// reqwest-backed network transport
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// Create a new HttpNetwork with default settings
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(10))
    }

    /// Create a new HttpNetwork with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                OfflineError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(HttpNetwork { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest, options: &FetchOptions) -> Result<HttpResponse> {
        debug!(
            "Fetching {} {} (cache_mode={:?})",
            request.method, request.url, options.cache_mode
        );

        let mut headers = request.headers.clone();
        headers.remove(HOST);
        if options.cache_mode == CacheMode::NoStore {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Fetch failed for url={}: {}", request.url, e);
            if e.is_timeout() {
                OfflineError::Timeout(format!("{}: {}", request.url, e))
            } else {
                OfflineError::NetworkError(format!("{}: {}", request.url, e))
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            warn!("Failed to read body for url={}: {}", request.url, e);
            OfflineError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        debug!(
            "Fetched {} {}: status={}, {} bytes",
            request.method,
            request.url,
            status,
            body.len()
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn enable_navigation_preload(&self) -> Result<()> {
        Ok(())
    }
}
