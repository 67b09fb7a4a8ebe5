//! Configuration management for the offline shell cache

use crate::error::{OfflineError, Result};
use crate::models::{CacheKey, Generation};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Configuration for the offline shell cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Prefix of every generation id (default: "handtap")
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Deployed version; a new version means a new generation (default: "v6")
    #[serde(default = "default_version")]
    pub version: String,

    /// Absolute URL of the controlled scope; its origin is "same origin"
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Document served when a navigation cannot reach the network
    #[serde(default = "default_shell_document")]
    pub shell_document: String,

    /// The looping media asset
    #[serde(default)]
    pub media: MediaConfig,

    /// Optional document served when the media asset is unavailable
    #[serde(default)]
    pub offline_fallback: Option<String>,

    /// Extra assets stored at install time (manifest, icons, ...)
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Network fetch timeout in seconds (default: 10)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Maximum concurrent fetches during install (default: 4)
    #[serde(default = "default_max_concurrent_installs")]
    pub max_concurrent_installs: usize,

    /// Try to enable navigation preload on activation (default: true)
    #[serde(default = "default_true")]
    pub navigation_preload: bool,

    /// Mirror generations to this directory when set
    #[serde(default)]
    pub persistence_dir: Option<String>,

    /// Address the HTTP front listens on (default: "127.0.0.1:3000")
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Media asset settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    /// Path of the media asset relative to the scope
    #[serde(default = "default_media_path")]
    pub path: String,

    /// Content-Type of synthesized media responses
    #[serde(default = "default_media_content_type")]
    pub content_type: String,

    /// Cache-Control of synthesized media responses
    #[serde(default = "default_media_cache_control")]
    pub cache_control: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            path: default_media_path(),
            content_type: default_media_content_type(),
            cache_control: default_media_cache_control(),
        }
    }
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_cache_prefix() -> String {
    "handtap".to_string()
}

fn default_version() -> String {
    "v6".to_string()
}

fn default_scope() -> String {
    "http://127.0.0.1:8080/".to_string()
}

fn default_shell_document() -> String {
    "./index.html".to_string()
}

fn default_media_path() -> String {
    "./assets/hand-loop.mp4".to_string()
}

fn default_media_content_type() -> String {
    "video/mp4".to_string()
}

fn default_media_cache_control() -> String {
    "public, max-age=31536000, immutable".to_string()
}

fn default_precache() -> Vec<String> {
    vec![
        "./".to_string(),
        "./manifest.webmanifest".to_string(),
        "./icons/icon-192.png".to_string(),
        "./icons/icon-512.png".to_string(),
    ]
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_max_concurrent_installs() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_listen_address() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for OfflineConfig {
    fn default() -> Self {
        OfflineConfig {
            cache_prefix: default_cache_prefix(),
            version: default_version(),
            scope: default_scope(),
            shell_document: default_shell_document(),
            media: MediaConfig::default(),
            offline_fallback: None,
            precache: default_precache(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_concurrent_installs: default_max_concurrent_installs(),
            navigation_preload: default_true(),
            persistence_dir: None,
            listen_address: default_listen_address(),
            metrics_endpoint: None,
        }
    }
}

impl OfflineConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(OfflineConfig)` if loading and validation succeed
    /// * `Err(OfflineError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            OfflineError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: OfflineConfig = serde_yaml::from_str(&content).map_err(|e| {
            OfflineError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - cache_prefix and version are non-empty and limited to `[A-Za-z0-9._-]`
    /// - scope is an absolute http(s) URL
    /// - every asset path resolves to a same-origin URL under the scope
    /// - fetch_timeout_secs and max_concurrent_installs are > 0
    /// - listen_address (and the metrics address, if enabled) parse as socket addresses
    pub fn validate(&self) -> Result<()> {
        validate_generation_part("cache_prefix", &self.cache_prefix)?;
        validate_generation_part("version", &self.version)?;

        let scope = self.scope_url()?;

        for path in self.install_paths() {
            let url = self.resolve(&path)?;
            if url.origin() != scope.origin() {
                return Err(OfflineError::ConfigError(format!(
                    "asset '{}' resolves outside the scope origin: {}",
                    path, url
                )));
            }
        }

        if self.media.content_type.is_empty() {
            return Err(OfflineError::ConfigError(
                "media.content_type must not be empty".to_string(),
            ));
        }

        if self.fetch_timeout_secs == 0 {
            return Err(OfflineError::ConfigError(
                "fetch_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_installs == 0 {
            return Err(OfflineError::ConfigError(
                "max_concurrent_installs must be greater than 0".to_string(),
            ));
        }

        self.listen_addr()?;

        if let Some(endpoint) = &self.metrics_endpoint {
            if endpoint.enabled {
                endpoint.address.parse::<SocketAddr>().map_err(|e| {
                    OfflineError::ConfigError(format!(
                        "Invalid metrics_endpoint address '{}': {}",
                        endpoint.address, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Generation id of this deployed version
    pub fn generation(&self) -> Generation {
        Generation::new(&self.cache_prefix, &self.version)
    }

    /// Parsed scope URL
    pub fn scope_url(&self) -> Result<Url> {
        let url = Url::parse(&self.scope).map_err(|e| {
            OfflineError::ConfigError(format!("Invalid scope '{}': {}", self.scope, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(OfflineError::ConfigError(format!(
                "scope must be an http(s) URL, got scheme '{}'",
                other
            ))),
        }
    }

    /// Resolve a path relative to the scope into an absolute URL
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.scope_url()?.join(path).map_err(|e| {
            OfflineError::ConfigError(format!("Invalid asset path '{}': {}", path, e))
        })
    }

    /// Absolute URL of the media asset, query and fragment stripped
    pub fn media_url(&self) -> Result<Url> {
        let url = self.resolve(&self.media.path)?;
        Ok(crate::models::strip_query_and_fragment(&url))
    }

    pub fn shell_url(&self) -> Result<Url> {
        self.resolve(&self.shell_document)
    }

    pub fn offline_fallback_url(&self) -> Result<Option<Url>> {
        self.offline_fallback
            .as_deref()
            .map(|path| self.resolve(path))
            .transpose()
    }

    /// Every path stored at install time, deduplicated by canonical key
    ///
    /// Order: precache list, then shell document, media asset and offline
    /// fallback when they were not already listed.
    pub fn install_paths(&self) -> Vec<String> {
        let mut candidates: Vec<&String> = self.precache.iter().collect();
        candidates.push(&self.shell_document);
        candidates.push(&self.media.path);
        if let Some(fallback) = &self.offline_fallback {
            candidates.push(fallback);
        }

        let mut seen: Vec<CacheKey> = Vec::new();
        let mut paths = Vec::new();
        for path in candidates {
            // Unresolvable paths are kept so validate() can report them
            let key = match self.resolve(path) {
                Ok(url) => CacheKey::from_url(&url),
                Err(_) => {
                    paths.push(path.clone());
                    continue;
                }
            };
            if !seen.contains(&key) {
                seen.push(key);
                paths.push(path.clone());
            }
        }
        paths
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse::<SocketAddr>().map_err(|e| {
            OfflineError::ConfigError(format!(
                "Invalid listen_address '{}': {}",
                self.listen_address, e
            ))
        })
    }
}

fn validate_generation_part(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(OfflineError::ConfigError(format!(
            "{} must not be empty",
            field
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if !value.chars().all(allowed) {
        return Err(OfflineError::ConfigError(format!(
            "{} may only contain [A-Za-z0-9._-], got '{}'",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OfflineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation().as_str(), "handtap-v6");
    }

    #[test]
    fn test_media_url_strips_query() {
        let config = OfflineConfig {
            media: MediaConfig {
                path: "./assets/hand-loop.mp4?cache=1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            config.media_url().unwrap().as_str(),
            "http://127.0.0.1:8080/assets/hand-loop.mp4"
        );
    }

    #[test]
    fn test_install_paths_deduplicates() {
        let config = OfflineConfig {
            precache: vec![
                "./".to_string(),
                "./index.html".to_string(),
                "index.html#top".to_string(),
            ],
            offline_fallback: Some("./offline.html".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.install_paths(),
            vec![
                "./".to_string(),
                "./index.html".to_string(),
                "./assets/hand-loop.mp4".to_string(),
                "./offline.html".to_string(),
            ]
        );
    }

    #[test]
    fn test_invalid_version_characters() {
        let config = OfflineConfig {
            version: "v6/../x".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OfflineError::ConfigError(_))));
    }

    #[test]
    fn test_scope_must_be_http() {
        let config = OfflineConfig {
            scope: "file:///tmp/app/".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cross_origin_asset_rejected() {
        let config = OfflineConfig {
            precache: vec!["https://cdn.example.com/lib.js".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = OfflineConfig {
            fetch_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
