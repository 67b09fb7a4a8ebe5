//! Metrics collection for the offline shell cache
//!
//! All counters are atomics and can be updated from any handler task.

use crate::router::Strategy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector
#[derive(Debug, Default)]
pub struct OfflineMetrics {
    // Request statistics
    total_requests: AtomicU64,
    navigation_requests: AtomicU64,
    media_requests: AtomicU64,
    revalidate_requests: AtomicU64,
    passthrough_requests: AtomicU64,

    // Cache statistics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,

    // Network statistics
    network_fetches: AtomicU64,
    network_failures: AtomicU64,
    background_refreshes: AtomicU64,
    background_refresh_failures: AtomicU64,

    // Response statistics
    fallback_responses: AtomicU64,
    failure_responses: AtomicU64,
    partial_responses: AtomicU64,
    unsatisfiable_responses: AtomicU64,

    // Byte statistics
    bytes_from_cache: AtomicU64,
    bytes_from_network: AtomicU64,

    // Lifecycle statistics
    installs: AtomicU64,
    install_failures: AtomicU64,
    generations_deleted: AtomicU64,

    // Latency statistics (stored as microseconds)
    total_request_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub navigation_requests: u64,
    pub media_requests: u64,
    pub revalidate_requests: u64,
    pub passthrough_requests: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,

    pub network_fetches: u64,
    pub network_failures: u64,
    pub background_refreshes: u64,
    pub background_refresh_failures: u64,

    pub fallback_responses: u64,
    pub failure_responses: u64,
    pub partial_responses: u64,
    pub unsatisfiable_responses: u64,

    pub bytes_from_cache: u64,
    pub bytes_from_network: u64,

    pub installs: u64,
    pub install_failures: u64,
    pub generations_deleted: u64,

    pub total_request_duration_us: u64,
}

impl OfflineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a classified request
    pub fn record_request(&self, strategy: Strategy) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match strategy {
            Strategy::Navigation => &self.navigation_requests,
            Strategy::Media => &self.media_requests,
            Strategy::StaleWhileRevalidate => &self.revalidate_requests,
            Strategy::Passthrough(_) => &self.passthrough_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self, bytes: u64) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a network fetch and its outcome
    ///
    /// # Arguments
    /// * `success` - Whether a response arrived
    /// * `bytes` - Body size of the response (0 on failure)
    pub fn record_fetch(&self, success: bool, bytes: u64) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
        if success {
            self.bytes_from_network.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.network_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_background_refresh(&self, success: bool) {
        self.background_refreshes.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.background_refresh_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a cached document served because the network failed
    pub fn record_fallback(&self) {
        self.fallback_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a synthetic failure response
    pub fn record_failure(&self) {
        self.failure_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial_response(&self) {
        self.partial_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsatisfiable_response(&self) {
        self.unsatisfiable_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_install(&self, success: bool) {
        if success {
            self.installs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.install_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_generations_deleted(&self, count: u64) {
        self.generations_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are read one by one, so a snapshot taken under load may not be
    /// perfectly consistent across counters.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            navigation_requests: self.navigation_requests.load(Ordering::Relaxed),
            media_requests: self.media_requests.load(Ordering::Relaxed),
            revalidate_requests: self.revalidate_requests.load(Ordering::Relaxed),
            passthrough_requests: self.passthrough_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            network_failures: self.network_failures.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            background_refresh_failures: self
                .background_refresh_failures
                .load(Ordering::Relaxed),
            fallback_responses: self.fallback_responses.load(Ordering::Relaxed),
            failure_responses: self.failure_responses.load(Ordering::Relaxed),
            partial_responses: self.partial_responses.load(Ordering::Relaxed),
            unsatisfiable_responses: self.unsatisfiable_responses.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            bytes_from_network: self.bytes_from_network.load(Ordering::Relaxed),
            installs: self.installs.load(Ordering::Relaxed),
            install_failures: self.install_failures.load(Ordering::Relaxed),
            generations_deleted: self.generations_deleted.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage (0-100)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Network failure rate as a percentage (0-100)
    pub fn network_failure_rate(&self) -> f64 {
        if self.network_fetches == 0 {
            0.0
        } else {
            (self.network_failures as f64 / self.network_fetches as f64) * 100.0
        }
    }

    /// Average intercepted request duration in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        let intercepted = self.total_requests - self.passthrough_requests;
        if intercepted == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / intercepted as f64) / 1000.0
        }
    }
}
