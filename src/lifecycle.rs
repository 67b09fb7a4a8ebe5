//! Install and activation of a cache generation
//!
//! One `LifecycleManager` models one deployed worker version. Install
//! fetches every configured asset before writing anything, so a generation
//! is either complete or absent. Activation garbage-collects every other
//! generation and starts intercepting.

use crate::cache_store::CacheStore;
use crate::config::OfflineConfig;
use crate::error::{OfflineError, Result};
use crate::metrics::OfflineMetrics;
use crate::models::{CacheKey, FetchRequest, Generation, HttpResponse};
use crate::network::{FetchOptions, Network};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this worker never takes control
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an activation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub generation: Generation,
    /// Generations removed, sorted
    pub deleted: Vec<Generation>,
    pub navigation_preload: bool,
    pub claimed: bool,
}

/// Drives install and activate for one configured version
pub struct LifecycleManager {
    config: Arc<OfflineConfig>,
    store: Arc<CacheStore>,
    network: Arc<dyn Network>,
    metrics: Arc<OfflineMetrics>,
    state: RwLock<WorkerState>,
    navigation_preload: AtomicBool,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<OfflineConfig>,
        store: Arc<CacheStore>,
        network: Arc<dyn Network>,
        metrics: Arc<OfflineMetrics>,
    ) -> Self {
        LifecycleManager {
            config,
            store,
            network,
            metrics,
            state: RwLock::new(WorkerState::Parsed),
            navigation_preload: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether fetches should be intercepted
    pub fn can_intercept(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    pub fn navigation_preload_enabled(&self) -> bool {
        self.navigation_preload.load(Ordering::Acquire)
    }

    fn transition(&self, next: WorkerState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        debug!("Worker state {} -> {}", *state, next);
        *state = next;
    }

    /// Populate a fresh generation with every configured asset
    ///
    /// All-or-nothing: if any asset fails to fetch or store, the error is
    /// returned, the worker becomes [`WorkerState::Redundant`] and whatever
    /// generation was serving before stays untouched. On success the worker
    /// skips waiting and moves straight to [`WorkerState::Installed`].
    pub async fn install(&self) -> Result<Generation> {
        let state = self.state();
        if state != WorkerState::Parsed && state != WorkerState::Installed {
            return Err(OfflineError::InternalError(format!(
                "cannot install from state {}",
                state
            )));
        }

        self.transition(WorkerState::Installing);
        let generation = self.config.generation();
        let start = Instant::now();

        match self.precache(&generation).await {
            Ok(count) => {
                self.metrics.record_install(true);
                info!(
                    "Installed generation {} with {} entries in {:?}",
                    generation,
                    count,
                    start.elapsed()
                );
                self.transition(WorkerState::Installed);
                Ok(generation)
            }
            Err(e) => {
                self.metrics.record_install(false);
                error!("Install of generation {} failed: {}", generation, e);
                self.transition(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    async fn precache(&self, generation: &Generation) -> Result<usize> {
        let media_key = CacheKey::canonical(&self.config.media_url()?);
        let mut targets = Vec::new();
        for path in self.config.install_paths() {
            let url = self.config.resolve(&path)?;
            let key = if CacheKey::canonical(&url) == media_key {
                media_key.clone()
            } else {
                CacheKey::from_url(&url)
            };
            targets.push((key, url));
        }

        // Stage 1: fetch everything with bounded concurrency
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_installs));
        let mut tasks = Vec::with_capacity(targets.len());

        for (key, url) in targets {
            let sem = Arc::clone(&semaphore);
            let network = Arc::clone(&self.network);
            let metrics = Arc::clone(&self.metrics);
            let is_media = key == media_key;

            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|e| {
                    OfflineError::InternalError(format!("install semaphore closed: {}", e))
                })?;
                fetch_install_asset(network.as_ref(), &metrics, key, url, is_media).await
            }));
        }

        let mut fetched: Vec<(CacheKey, HttpResponse)> = Vec::with_capacity(tasks.len());
        let mut failure: Option<OfflineError> = None;
        for task in tasks {
            if failure.is_some() {
                task.abort();
                continue;
            }
            match task.await {
                Ok(Ok(entry)) => fetched.push(entry),
                Ok(Err(e)) => failure = Some(e),
                Err(e) => {
                    failure = Some(OfflineError::InternalError(format!(
                        "install task join error: {}",
                        e
                    )))
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        // Stage 2: write the generation
        let existed = self.store.has_generation(generation);
        self.store.open(generation).await?;

        let count = fetched.len();
        for (key, response) in fetched {
            if let Err(e) = self.store.put(generation, &key, response).await {
                if !existed {
                    warn!("Removing half-written generation {}", generation);
                    if let Err(cleanup) = self.store.delete_generation(generation).await {
                        error!("Failed to remove generation {}: {}", generation, cleanup);
                    }
                }
                return Err(OfflineError::install_failed(key.as_str(), e.to_string()));
            }
        }
        Ok(count)
    }

    /// Make `current` the only generation and take control
    ///
    /// Navigation preload is enabled best-effort; a transport that does not
    /// offer it leaves activation unaffected.
    pub async fn activate(&self, current: &Generation) -> Result<ActivationReport> {
        let state = self.state();
        if state != WorkerState::Installed && state != WorkerState::Activated {
            return Err(OfflineError::InternalError(format!(
                "cannot activate from state {}",
                state
            )));
        }
        if !self.store.has_generation(current) {
            return Err(OfflineError::StorageError(format!(
                "generation {} is not installed",
                current
            )));
        }

        self.transition(WorkerState::Activating);

        let mut deleted = Vec::new();
        for generation in self.store.list_generations().await {
            if &generation == current {
                continue;
            }
            match self.store.delete_generation(&generation).await {
                Ok(true) => deleted.push(generation),
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to delete generation {}: {}", generation, e);
                    self.transition(state);
                    return Err(e);
                }
            }
        }
        self.metrics.record_generations_deleted(deleted.len() as u64);

        let navigation_preload = self.enable_navigation_preload().await;
        self.transition(WorkerState::Activated);

        info!(
            "Activated generation {} (deleted {:?}, navigation_preload={})",
            current, deleted, navigation_preload
        );

        Ok(ActivationReport {
            generation: current.clone(),
            deleted,
            navigation_preload,
            claimed: true,
        })
    }

    /// Keep serving a generation left behind by an earlier complete install
    ///
    /// Used when this version failed to install: the generation that was
    /// serving before stays current and nothing is deleted.
    pub async fn resume(&self, generation: &Generation) -> Result<()> {
        let state = self.state();
        if state != WorkerState::Parsed && state != WorkerState::Redundant {
            return Err(OfflineError::InternalError(format!(
                "cannot resume from state {}",
                state
            )));
        }
        if !self.store.has_generation(generation) {
            return Err(OfflineError::StorageError(format!(
                "generation {} is not installed",
                generation
            )));
        }

        let navigation_preload = self.enable_navigation_preload().await;
        self.transition(WorkerState::Activated);
        info!(
            "Resumed generation {} (navigation_preload={})",
            generation, navigation_preload
        );
        Ok(())
    }

    /// Stored generation under this deployment's prefix, if any
    ///
    /// The configured generation wins when it is still present, which only
    /// happens when it was complete before a reinstall failed. Otherwise the
    /// last one in sorted order is chosen; activation leaves only one.
    pub async fn previous_generation(&self) -> Option<Generation> {
        let current = self.config.generation();
        let prefix = format!("{}-", self.config.cache_prefix);
        let candidates: Vec<Generation> = self
            .store
            .list_generations()
            .await
            .into_iter()
            .filter(|generation| generation.as_str().starts_with(&prefix))
            .collect();

        if candidates.contains(&current) {
            return Some(current);
        }
        candidates.into_iter().next_back()
    }

    async fn enable_navigation_preload(&self) -> bool {
        let enabled = if self.config.navigation_preload {
            match self.network.enable_navigation_preload().await {
                Ok(()) => true,
                Err(e) => {
                    debug!("Navigation preload not enabled: {}", e);
                    false
                }
            }
        } else {
            false
        };
        self.navigation_preload.store(enabled, Ordering::Release);
        enabled
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }
}

async fn fetch_install_asset(
    network: &dyn Network,
    metrics: &OfflineMetrics,
    key: CacheKey,
    url: reqwest::Url,
    is_media: bool,
) -> Result<(CacheKey, HttpResponse)> {
    let options = if is_media {
        FetchOptions::no_store()
    } else {
        FetchOptions::default()
    };
    let request = FetchRequest::get(url.clone());

    let result = network.fetch(&request, &options).await;
    metrics.record_fetch(
        result.is_ok(),
        result.as_ref().map(|r| r.size()).unwrap_or(0),
    );

    let response = result.map_err(|e| OfflineError::install_failed(url.as_str(), e.to_string()))?;

    let acceptable = if is_media {
        response.is_full()
    } else {
        response.is_success()
    };
    if !acceptable {
        return Err(OfflineError::install_failed(
            url.as_str(),
            OfflineError::origin_status(response.status.as_u16(), url.as_str()).to_string(),
        ));
    }

    debug!("Precached {} ({} bytes)", key, response.body.len());
    Ok((key, response))
}
