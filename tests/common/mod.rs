//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use offline_shell_cache::{
    CacheMode, CacheStore, FetchOptions, FetchRequest, Generation, HttpResponse,
    LifecycleManager, Network, OfflineConfig, OfflineController, OfflineError, OfflineMetrics,
    Result,
};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const SCOPE: &str = "http://app.test/hand/";
pub const MEDIA_URL: &str = "http://app.test/hand/assets/hand-loop.mp4";
pub const SHELL_URL: &str = "http://app.test/hand/index.html";

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub cache_mode: CacheMode,
    pub range: Option<String>,
}

#[derive(Clone)]
enum Scripted {
    Respond(HttpResponse),
    Fail,
}

/// Scripted network: fixed responses per URL, 404 for anything unknown
pub struct MockNetwork {
    routes: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
    offline: AtomicBool,
    preload_supported: bool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        MockNetwork {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            preload_supported: false,
            gate: Mutex::new(None),
        }
    }

    pub fn with_preload_support() -> Self {
        MockNetwork {
            preload_supported: true,
            ..MockNetwork::new()
        }
    }

    pub fn respond(&self, url: &str, response: HttpResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Scripted::Respond(response));
    }

    pub fn fail(&self, url: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Scripted::Fail);
    }

    /// Every fetch fails while offline
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Stall the next fetch until the returned handle is notified
    pub fn hold_next(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.url == url)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &FetchRequest, options: &FetchOptions) -> Result<HttpResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            url: request.url.to_string(),
            cache_mode: options.cache_mode,
            range: request.range_header().map(str::to_string),
        });

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(OfflineError::NetworkError("offline".to_string()));
        }

        let scripted = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        match scripted {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail) => Err(OfflineError::NetworkError(format!(
                "connection refused: {}",
                request.url
            ))),
            None => Ok(HttpResponse::new(StatusCode::NOT_FOUND, "not found")),
        }
    }

    async fn enable_navigation_preload(&self) -> Result<()> {
        if self.preload_supported {
            Ok(())
        } else {
            Err(OfflineError::Unsupported("navigation preload".to_string()))
        }
    }
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn config() -> OfflineConfig {
    OfflineConfig {
        scope: SCOPE.to_string(),
        ..Default::default()
    }
}

pub fn config_version(version: &str) -> OfflineConfig {
    OfflineConfig {
        version: version.to_string(),
        ..config()
    }
}

/// Deterministic media body of `len` bytes
pub fn media_body(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

pub fn html(body: &'static str) -> HttpResponse {
    HttpResponse::ok(body).with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
}

/// Script every asset of the default install list
pub fn script_install_assets(network: &MockNetwork, media_len: usize) {
    network.respond(SCOPE, html("<html>root</html>"));
    network.respond(SHELL_URL, html("<html>shell</html>"));
    network.respond(
        "http://app.test/hand/manifest.webmanifest",
        HttpResponse::ok(r#"{"name":"handtap"}"#),
    );
    network.respond("http://app.test/hand/icons/icon-192.png", HttpResponse::ok("png192"));
    network.respond("http://app.test/hand/icons/icon-512.png", HttpResponse::ok("png512"));
    network.respond(
        MEDIA_URL,
        HttpResponse::ok(media_body(media_len))
            .with_header(CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
    );
}

pub struct Harness {
    pub config: Arc<OfflineConfig>,
    pub store: Arc<CacheStore>,
    pub network: Arc<MockNetwork>,
    pub metrics: Arc<OfflineMetrics>,
    pub lifecycle: LifecycleManager,
    pub controller: OfflineController,
}

impl Harness {
    pub fn new(config: OfflineConfig, network: MockNetwork) -> Self {
        Harness::with_store(config, network, Arc::new(CacheStore::new()))
    }

    pub fn with_store(config: OfflineConfig, network: MockNetwork, store: Arc<CacheStore>) -> Self {
        let config = Arc::new(config);
        let network = Arc::new(network);
        let metrics = Arc::new(OfflineMetrics::new());
        let lifecycle = LifecycleManager::new(
            Arc::clone(&config),
            Arc::clone(&store),
            network.clone(),
            Arc::clone(&metrics),
        );
        let controller = OfflineController::new(
            Arc::clone(&config),
            Arc::clone(&store),
            network.clone(),
            Arc::clone(&metrics),
        )
        .unwrap();

        Harness {
            config,
            store,
            network,
            metrics,
            lifecycle,
            controller,
        }
    }

    /// Harness whose configured generation is opened but empty
    pub async fn opened(config: OfflineConfig, network: MockNetwork) -> (Harness, Generation) {
        let harness = Harness::new(config, network);
        let generation = harness.config.generation();
        harness.store.open(&generation).await.unwrap();
        (harness, generation)
    }

    /// Default config with every asset scripted, installed and activated
    pub async fn activated(media_len: usize) -> (Harness, Generation) {
        let network = MockNetwork::new();
        script_install_assets(&network, media_len);
        let harness = Harness::new(config(), network);

        let generation = harness.lifecycle.install().await.unwrap();
        harness.lifecycle.activate(&generation).await.unwrap();
        harness.network.clear_calls();
        (harness, generation)
    }
}
