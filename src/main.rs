//! Offline Shell Cache Server
//!
//! Loads configuration, installs and activates the configured generation,
//! then serves the scope through the cache controller.

use anyhow::Context;
use offline_shell_cache::{
    CacheStore, HttpNetwork, LifecycleManager, MetricsEndpoint, Network, OfflineConfig,
    OfflineController, OfflineMetrics, OfflineServer,
};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main entry point
///
/// # Usage
/// ```bash
/// # Start with default config (offline_shell_cache.yaml)
/// cargo run
///
/// # Start with custom config
/// cargo run -- /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    if let Err(e) = run().await {
        error!("Offline shell cache stopped: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "offline_shell_cache.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = OfflineConfig::from_file(&config_path)
        .with_context(|| format!("invalid configuration in {}", config_path))?;

    info!("Configuration loaded successfully");
    info!("  - Generation: {}", config.generation());
    info!("  - Scope: {}", config.scope);
    info!("  - Media asset: {}", config.media.path);
    info!("  - Install list: {:?}", config.install_paths());
    info!("  - Persistence: {:?}", config.persistence_dir);
    let config = Arc::new(config);

    let store = match &config.persistence_dir {
        Some(dir) => CacheStore::with_persistence(dir)
            .await
            .with_context(|| format!("cannot open cache directory {}", dir))?,
        None => CacheStore::new(),
    };
    let store = Arc::new(store);
    let metrics = Arc::new(OfflineMetrics::new());
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::with_timeout(config.fetch_timeout())?);

    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&network),
        Arc::clone(&metrics),
    ));
    let controller = Arc::new(OfflineController::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&network),
        Arc::clone(&metrics),
    )?);
    let server = Arc::new(OfflineServer::new(
        Arc::clone(&controller),
        Arc::clone(&lifecycle),
        Arc::clone(&network),
    ));

    if let Some(endpoint) = config.metrics_endpoint.as_ref().filter(|e| e.enabled) {
        let addr = endpoint.address.parse().context("invalid metrics address")?;
        let endpoint = MetricsEndpoint::new(Arc::clone(&metrics), addr).with_store(Arc::clone(&store));
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    // Until activation the server forwards everything untouched
    let listen = config.listen_addr()?;
    let serving = tokio::spawn(Arc::clone(&server).serve(listen));

    match lifecycle.install().await {
        Ok(generation) => {
            let report = lifecycle.activate(&generation).await?;
            info!(
                "Activated {} (deleted {} old generations, navigation preload {})",
                report.generation,
                report.deleted.len(),
                report.navigation_preload
            );
            server.set_generation(generation);
        }
        Err(e) => match lifecycle.previous_generation().await {
            Some(previous) => {
                warn!("Install failed, keeping generation {}: {}", previous, e);
                lifecycle.resume(&previous).await?;
                server.set_generation(previous);
            }
            None => {
                warn!("Install failed, forwarding all requests: {}", e);
            }
        },
    }

    tokio::select! {
        result = serving => {
            result.context("server task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down, waiting for background refreshes");
            controller.settle_background().await;
        }
    }

    Ok(())
}
