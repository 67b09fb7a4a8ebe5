//! Metrics HTTP endpoint
//!
//! Serves the counters of [`OfflineMetrics`] in Prometheus text format at
//! `/metrics` and as JSON at `/stats`, on a port separate from the cache
//! front.

use crate::cache_store::{CacheStats, CacheStore};
use crate::error::Result;
use crate::metrics::{MetricsSnapshot, OfflineMetrics};
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

const PREFIX: &str = "offline_shell_cache";

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<OfflineMetrics>,
    store: Option<Arc<CacheStore>>,
    addr: SocketAddr,
}

/// Body of `/stats`
#[derive(Debug, Serialize)]
struct StatsReport {
    #[serde(flatten)]
    counters: MetricsSnapshot,
    cache_hit_rate: f64,
    network_failure_rate: f64,
    avg_request_duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<CacheStats>,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Example
    /// ```no_run
    /// use offline_shell_cache::metrics::OfflineMetrics;
    /// use offline_shell_cache::metrics_endpoint::MetricsEndpoint;
    /// use std::sync::Arc;
    ///
    /// let metrics = Arc::new(OfflineMetrics::new());
    /// let endpoint = MetricsEndpoint::new(metrics, "127.0.0.1:9090".parse().unwrap());
    /// ```
    pub fn new(metrics: Arc<OfflineMetrics>, addr: SocketAddr) -> Self {
        Self {
            metrics,
            store: None,
            addr,
        }
    }

    /// Also report store size gauges
    pub fn with_store(mut self, store: Arc<CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Serve until the process exits
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);
            let store = self.store.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics = Arc::clone(&metrics);
                    let store = store.clone();
                    async move { handle_request(req, &metrics, store.as_deref()) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

fn handle_request<B>(
    req: Request<B>,
    metrics: &OfflineMetrics,
    store: Option<&CacheStore>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => {
            let stats = store.map(CacheStore::stats);
            text_response(
                StatusCode::OK,
                "text/plain; version=0.0.4; charset=utf-8",
                format_prometheus_metrics(&metrics.get_stats(), stats.as_ref()),
            )
        }
        "/stats" => stats_response(metrics, store),
        "/health" => text_response(
            StatusCode::OK,
            "application/json",
            r#"{"status":"healthy"}"#,
        ),
        "/" => text_response(
            StatusCode::OK,
            "text/plain; charset=utf-8",
            "offline shell cache metrics\n/metrics  Prometheus text\n/stats    JSON\n/health   health check\n",
        ),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found"),
    };
    Ok(response)
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn stats_response(metrics: &OfflineMetrics, store: Option<&CacheStore>) -> Response<Full<Bytes>> {
    let counters = metrics.get_stats();
    let report = StatsReport {
        cache_hit_rate: counters.cache_hit_rate(),
        network_failure_rate: counters.network_failure_rate(),
        avg_request_duration_ms: counters.avg_request_duration_ms(),
        counters,
        store: store.map(CacheStore::stats),
    };

    match serde_json::to_vec(&report) {
        Ok(body) => text_response(StatusCode::OK, "application/json", body),
        Err(e) => {
            error!("Failed to serialize stats: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "failed to serialize stats",
            )
        }
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {PREFIX}_{name} {help}");
    let _ = writeln!(out, "# TYPE {PREFIX}_{name} counter");
    let _ = writeln!(out, "{PREFIX}_{name} {value}\n");
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    let _ = writeln!(out, "# HELP {PREFIX}_{name} {help}");
    let _ = writeln!(out, "# TYPE {PREFIX}_{name} gauge");
    let _ = writeln!(out, "{PREFIX}_{name} {value:.2}\n");
}

/// Format metrics in Prometheus exposition format
fn format_prometheus_metrics(snapshot: &MetricsSnapshot, store: Option<&CacheStats>) -> String {
    let mut out = String::new();

    // Requests
    counter(&mut out, "requests_total", "Total number of intercepted requests", snapshot.total_requests);
    counter(&mut out, "navigation_requests_total", "Requests served with the navigation strategy", snapshot.navigation_requests);
    counter(&mut out, "media_requests_total", "Requests served with the media strategy", snapshot.media_requests);
    counter(&mut out, "revalidate_requests_total", "Requests served with stale-while-revalidate", snapshot.revalidate_requests);
    counter(&mut out, "passthrough_requests_total", "Requests left to the default transport", snapshot.passthrough_requests);

    // Cache
    counter(&mut out, "cache_hits_total", "Number of cache hits", snapshot.cache_hits);
    counter(&mut out, "cache_misses_total", "Number of cache misses", snapshot.cache_misses);
    counter(&mut out, "cache_errors_total", "Number of cache read or write errors", snapshot.cache_errors);
    gauge(&mut out, "cache_hit_rate", "Cache hit rate percentage", snapshot.cache_hit_rate());

    // Network
    counter(&mut out, "network_fetches_total", "Number of network fetches", snapshot.network_fetches);
    counter(&mut out, "network_failures_total", "Number of failed network fetches", snapshot.network_failures);
    counter(&mut out, "background_refreshes_total", "Number of background refreshes", snapshot.background_refreshes);
    counter(&mut out, "background_refresh_failures_total", "Background refreshes that left the entry unchanged", snapshot.background_refresh_failures);
    gauge(&mut out, "network_failure_rate", "Network failure rate percentage", snapshot.network_failure_rate());

    // Responses
    counter(&mut out, "fallback_responses_total", "Cached fallback documents served offline", snapshot.fallback_responses);
    counter(&mut out, "failure_responses_total", "Synthetic failure responses", snapshot.failure_responses);
    counter(&mut out, "partial_responses_total", "206 responses built from cached media", snapshot.partial_responses);
    counter(&mut out, "unsatisfiable_responses_total", "416 responses built from cached media", snapshot.unsatisfiable_responses);

    // Bytes
    counter(&mut out, "bytes_from_cache_total", "Body bytes served from cache", snapshot.bytes_from_cache);
    counter(&mut out, "bytes_from_network_total", "Body bytes received from the network", snapshot.bytes_from_network);

    // Lifecycle
    counter(&mut out, "installs_total", "Successful installs", snapshot.installs);
    counter(&mut out, "install_failures_total", "Failed installs", snapshot.install_failures);
    counter(&mut out, "generations_deleted_total", "Generations removed at activation", snapshot.generations_deleted);

    gauge(&mut out, "request_duration_ms_avg", "Average intercepted request duration in milliseconds", snapshot.avg_request_duration_ms());

    if let Some(stats) = store {
        gauge(&mut out, "store_generations", "Generations held by the store", stats.generations as f64);
        gauge(&mut out, "store_entries", "Entries held by the store", stats.total_entries as f64);
        gauge(&mut out, "store_bytes", "Body bytes held by the store", stats.total_bytes as f64);
    }

    out
}
