//! Fetch interception: dispatches each request to its serving strategy
//!
//! The controller owns no notion of "current generation"; callers pass the
//! generation produced by [`crate::LifecycleManager::install`] into every
//! call.

use crate::cache_store::CacheStore;
use crate::config::OfflineConfig;
use crate::error::Result;
use crate::metrics::OfflineMetrics;
use crate::models::{CacheKey, FetchRequest, Generation, HttpResponse};
use crate::network::{FetchOptions, Network};
use crate::range_resolver::{RangeResolution, RangeResolver};
use crate::response_builder::PartialResponseBuilder;
use crate::router::{PassthroughReason, RequestRouter, Strategy};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A navigation response the embedding environment started fetching
/// concurrently with routing. Resolves to `None` when no preload was made.
pub type PreloadResponse = Pin<Box<dyn Future<Output = Result<Option<HttpResponse>>> + Send>>;

/// One intercepted request
pub struct FetchEvent {
    pub request: FetchRequest,
    pub preload: Option<PreloadResponse>,
}

impl FetchEvent {
    pub fn new(request: FetchRequest) -> Self {
        FetchEvent {
            request,
            preload: None,
        }
    }

    pub fn with_preload(mut self, preload: PreloadResponse) -> Self {
        self.preload = Some(preload);
        self
    }
}

/// Where a returned response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fresh from the network
    Network,
    /// The navigation preload response
    Preload,
    /// Stored entry returned as-is
    Cache,
    /// Built from a stored media body (200, 206 or 416)
    Synthesized,
    /// Shell document or offline page served because the network failed
    Fallback,
    /// Neither cache nor network could answer
    Failure,
}

/// Result of handling one fetch event
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the default transport handles the request untouched
    NotHandled(PassthroughReason),
    /// Intercepted and answered
    Respond {
        response: HttpResponse,
        source: ResponseSource,
    },
}

impl FetchOutcome {
    fn respond(response: HttpResponse, source: ResponseSource) -> Self {
        FetchOutcome::Respond { response, source }
    }

    fn failure() -> Self {
        FetchOutcome::respond(HttpResponse::failure(), ResponseSource::Failure)
    }

    pub fn is_handled(&self) -> bool {
        matches!(self, FetchOutcome::Respond { .. })
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            FetchOutcome::NotHandled(_) => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Respond { source, .. } => Some(*source),
            FetchOutcome::NotHandled(_) => None,
        }
    }

    pub fn into_response(self) -> Option<HttpResponse> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            FetchOutcome::NotHandled(_) => None,
        }
    }
}

/// Serves intercepted requests from the cache store and the network
pub struct OfflineController {
    config: Arc<OfflineConfig>,
    router: RequestRouter,
    store: Arc<CacheStore>,
    network: Arc<dyn Network>,
    builder: PartialResponseBuilder,
    metrics: Arc<OfflineMetrics>,
    shell_key: CacheKey,
    offline_fallback_key: Option<CacheKey>,
    background: Mutex<JoinSet<()>>,
}

impl OfflineController {
    /// Create a controller over a shared store and network
    pub fn new(
        config: Arc<OfflineConfig>,
        store: Arc<CacheStore>,
        network: Arc<dyn Network>,
        metrics: Arc<OfflineMetrics>,
    ) -> Result<Self> {
        let router = RequestRouter::new(&config)?;
        let builder =
            PartialResponseBuilder::new(&config.media.content_type, &config.media.cache_control)?;
        let shell_key = CacheKey::from_url(&config.shell_url()?);
        let offline_fallback_key = config
            .offline_fallback_url()?
            .map(|url| CacheKey::from_url(&url));

        Ok(OfflineController {
            config,
            router,
            store,
            network,
            builder,
            metrics,
            shell_key,
            offline_fallback_key,
            background: Mutex::new(JoinSet::new()),
        })
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<OfflineMetrics> {
        &self.metrics
    }

    /// Handle one intercepted request against `generation`
    ///
    /// Returns [`FetchOutcome::NotHandled`] for non-GET and cross-origin
    /// requests; every other request gets a response, synthetic failure
    /// included.
    pub async fn handle_fetch(&self, generation: &Generation, event: FetchEvent) -> FetchOutcome {
        let start = Instant::now();
        let FetchEvent { request, preload } = event;
        let strategy = self.router.classify(&request);
        self.metrics.record_request(strategy);

        let outcome = match strategy {
            Strategy::Passthrough(reason) => return FetchOutcome::NotHandled(reason),
            Strategy::Navigation => self.serve_navigation(generation, &request, preload).await,
            Strategy::Media => self.serve_media(generation, &request).await,
            Strategy::StaleWhileRevalidate => {
                self.serve_stale_while_revalidate(generation, &request).await
            }
        };

        if let FetchOutcome::Respond { response, source } = &outcome {
            if *source == ResponseSource::Failure {
                self.metrics.record_failure();
            }
            debug!(
                "{} {} -> {} via {:?} in {:?}",
                strategy.as_str(),
                request.url,
                response.status,
                source,
                start.elapsed()
            );
        }
        self.metrics.record_request_duration(start.elapsed());
        outcome
    }

    /// Network first; cached shell document when the network fails
    async fn serve_navigation(
        &self,
        generation: &Generation,
        request: &FetchRequest,
        preload: Option<PreloadResponse>,
    ) -> FetchOutcome {
        if let Some(preload) = preload {
            match preload.await {
                Ok(Some(response)) => {
                    debug!("Using preloaded navigation response for {}", request.url);
                    return FetchOutcome::respond(response, ResponseSource::Preload);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Navigation preload failed for {}: {}", request.url, e);
                    return self.navigation_fallback(generation).await;
                }
            }
        }

        match self.fetch(request, &FetchOptions::default()).await {
            Ok(response) => FetchOutcome::respond(response, ResponseSource::Network),
            Err(e) => {
                warn!("Navigation fetch failed for {}: {}", request.url, e);
                self.navigation_fallback(generation).await
            }
        }
    }

    async fn navigation_fallback(&self, generation: &Generation) -> FetchOutcome {
        match self.lookup(generation, &self.shell_key).await {
            Some(document) => {
                info!("Serving cached shell document {} offline", self.shell_key);
                self.metrics.record_fallback();
                FetchOutcome::respond(document, ResponseSource::Fallback)
            }
            None => FetchOutcome::failure(),
        }
    }

    /// Full body from cache, fetched once with no-store when missing, then
    /// sliced according to the request's Range header
    async fn serve_media(&self, generation: &Generation, request: &FetchRequest) -> FetchOutcome {
        let key = self.router.media_key();

        let entry = match self.lookup(generation, &key).await {
            Some(entry) if entry.is_full() => entry,
            _ => {
                let media_request = FetchRequest::get(self.router.media_url().clone());
                match self.fetch(&media_request, &FetchOptions::no_store()).await {
                    Ok(response) if response.is_full() => {
                        info!(
                            "Fetched full media body for {} ({} bytes)",
                            key,
                            response.body.len()
                        );
                        if let Err(e) = self.store.put(generation, &key, response.clone()).await {
                            warn!("Failed to store media body {}: {}", key, e);
                            self.metrics.record_cache_error();
                        }
                        response
                    }
                    Ok(response) => {
                        warn!(
                            "Media fetch for {} returned {}, not a full body",
                            key, response.status
                        );
                        return self.media_fallback(generation).await;
                    }
                    Err(e) => {
                        warn!("Media fetch failed for {}: {}", key, e);
                        return self.media_fallback(generation).await;
                    }
                }
            }
        };

        let resolution = RangeResolver::resolve(request.range_header(), entry.size());
        match self.builder.build(&resolution, &entry.body) {
            Ok(response) => {
                match resolution {
                    RangeResolution::Satisfiable(_) => self.metrics.record_partial_response(),
                    RangeResolution::Unsatisfiable => {
                        self.metrics.record_unsatisfiable_response()
                    }
                    RangeResolution::Full | RangeResolution::Unparseable => {}
                }
                FetchOutcome::respond(response, ResponseSource::Synthesized)
            }
            Err(e) => {
                error!("Failed to build media response for {}: {}", key, e);
                FetchOutcome::failure()
            }
        }
    }

    async fn media_fallback(&self, generation: &Generation) -> FetchOutcome {
        let key = match &self.offline_fallback_key {
            Some(key) => key,
            None => return FetchOutcome::failure(),
        };
        match self.lookup(generation, key).await {
            Some(document) => {
                info!("Serving offline fallback {} for media", key);
                self.metrics.record_fallback();
                FetchOutcome::respond(document, ResponseSource::Fallback)
            }
            None => FetchOutcome::failure(),
        }
    }

    /// Cached entry immediately with a background refresh; on a miss, wait
    /// for the network
    async fn serve_stale_while_revalidate(
        &self,
        generation: &Generation,
        request: &FetchRequest,
    ) -> FetchOutcome {
        let key = self.router.key_for(&request.url);

        if let Some(cached) = self.lookup(generation, &key).await {
            self.spawn_refresh(generation.clone(), key, request.clone());
            return FetchOutcome::respond(cached, ResponseSource::Cache);
        }

        match self.fetch(request, &FetchOptions::default()).await {
            Ok(response) => {
                if response.is_full() {
                    if let Err(e) = self.store.put(generation, &key, response.clone()).await {
                        warn!("Failed to store {}: {}", key, e);
                        self.metrics.record_cache_error();
                    }
                }
                FetchOutcome::respond(response, ResponseSource::Network)
            }
            Err(e) => {
                warn!("Fetch failed for {} with nothing cached: {}", request.url, e);
                FetchOutcome::failure()
            }
        }
    }

    fn spawn_refresh(&self, generation: Generation, key: CacheKey, request: FetchRequest) {
        let store = Arc::clone(&self.store);
        let network = Arc::clone(&self.network);
        let metrics = Arc::clone(&self.metrics);

        let mut tasks = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!("Background refresh task failed: {}", e);
            }
        }

        tasks.spawn(async move {
            let result = network.fetch(&request, &FetchOptions::default()).await;
            metrics.record_fetch(
                result.is_ok(),
                result.as_ref().map(|r| r.size()).unwrap_or(0),
            );

            let refreshed = match result {
                Ok(response) if response.is_full() => {
                    match store.put(&generation, &key, response).await {
                        Ok(()) => {
                            debug!("Refreshed {} in {}", key, generation);
                            true
                        }
                        Err(e) => {
                            warn!("Failed to store refreshed {}: {}", key, e);
                            metrics.record_cache_error();
                            false
                        }
                    }
                }
                Ok(response) => {
                    debug!("Keeping cached {}: refresh returned {}", key, response.status);
                    false
                }
                Err(e) => {
                    debug!("Background refresh of {} failed: {}", key, e);
                    false
                }
            };
            metrics.record_background_refresh(refreshed);
        });
    }

    /// Wait for every in-flight background refresh to finish
    pub async fn settle_background(&self) {
        let mut tasks = std::mem::take(
            &mut *self.background.lock().unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Background refresh task failed: {}", e);
            }
        }
    }

    /// Store lookup where storage errors count as a miss
    async fn lookup(&self, generation: &Generation, key: &CacheKey) -> Option<HttpResponse> {
        match self.store.get(generation, key).await {
            Ok(Some(response)) => {
                self.metrics.record_cache_hit(response.size());
                Some(response)
            }
            Ok(None) => {
                self.metrics.record_cache_miss();
                None
            }
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                self.metrics.record_cache_error();
                None
            }
        }
    }

    async fn fetch(&self, request: &FetchRequest, options: &FetchOptions) -> Result<HttpResponse> {
        let result = self.network.fetch(request, options).await;
        self.metrics.record_fetch(
            result.is_ok(),
            result.as_ref().map(|r| r.size()).unwrap_or(0),
        );
        result
    }
}
