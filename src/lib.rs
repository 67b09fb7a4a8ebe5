//! Offline Shell Cache
//!
//! An offline asset cache controller for a small single-page app: it
//! intercepts requests in its scope and serves the application shell and a
//! looping video from a generational cache, synthesizing byte-range (206)
//! responses from the fully cached video so seeking works without network
//! access.
//!
//! # Overview
//!
//! Each intercepted request is classified by the [`RequestRouter`] and
//! answered by one strategy:
//!
//! - **Navigation**: network first (or the navigation preload response),
//!   cached shell document when the network fails
//! - **Media**: full body from cache, fetched once with `no-store` when
//!   missing, sliced by the [`RangeResolver`] and [`PartialResponseBuilder`]
//! - **Stale-while-revalidate**: cached entry now, background refresh
//! - **Passthrough**: non-GET and cross-origin requests are not intercepted
//!
//! The [`LifecycleManager`] installs a complete generation (all or nothing)
//! and, on activation, deletes every other generation.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use offline_shell_cache::{
//!     CacheStore, HttpNetwork, LifecycleManager, OfflineConfig, OfflineController,
//!     OfflineMetrics,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> offline_shell_cache::Result<()> {
//! let config = Arc::new(OfflineConfig::from_file("offline_shell_cache.yaml")?);
//! let store = Arc::new(CacheStore::new());
//! let network = Arc::new(HttpNetwork::with_timeout(config.fetch_timeout())?);
//! let metrics = Arc::new(OfflineMetrics::new());
//!
//! let lifecycle = LifecycleManager::new(
//!     Arc::clone(&config),
//!     Arc::clone(&store),
//!     network.clone(),
//!     Arc::clone(&metrics),
//! );
//! let generation = lifecycle.install().await?;
//! lifecycle.activate(&generation).await?;
//!
//! let controller = OfflineController::new(config, store, network, metrics)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! cache_prefix: handtap
//! version: v6
//! scope: "http://127.0.0.1:8080/"
//! shell_document: ./index.html
//! media:
//!   path: ./assets/hand-loop.mp4
//!   content_type: video/mp4
//! precache:
//!   - ./
//!   - ./manifest.webmanifest
//! ```
//!
//! See [`OfflineConfig`] for every option.

pub mod cache_store;
pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod network;
pub mod persistence;
pub mod range_resolver;
pub mod response_builder;
pub mod router;
pub mod server;

// Re-export commonly used types
pub use cache_store::{CacheStats, CacheStore};
pub use config::{MediaConfig, MetricsEndpointConfig, OfflineConfig};
pub use controller::{FetchEvent, FetchOutcome, OfflineController, PreloadResponse, ResponseSource};
pub use error::{OfflineError, Result};
pub use lifecycle::{ActivationReport, LifecycleManager, WorkerState};
pub use metrics::{MetricsSnapshot, OfflineMetrics};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{ByteRange, CacheKey, FetchRequest, Generation, HttpResponse, RequestMode};
pub use network::{CacheMode, FetchOptions, HttpNetwork, Network};
pub use persistence::DiskPersistence;
pub use range_resolver::{RangeResolution, RangeResolver};
pub use response_builder::PartialResponseBuilder;
pub use router::{PassthroughReason, RequestRouter, Strategy};
pub use server::OfflineServer;
