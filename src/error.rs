//! Error types for the offline shell cache

use thiserror::Error;

/// Result type alias for offline cache operations
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Error types that can occur while serving from or maintaining the cache
#[derive(Error, Debug, Clone)]
pub enum OfflineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Origin returned status {status} for {url}")]
    OriginStatus { status: u16, url: String },

    #[error("Cache storage error: {0}")]
    StorageError(String),

    #[error("Install failed while precaching {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid byte range: {0}")]
    InvalidRange(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for OfflineError {
    fn from(err: std::io::Error) -> Self {
        OfflineError::IoError(err.to_string())
    }
}

impl OfflineError {
    /// Whether this error belongs to the network failure branch
    ///
    /// Strategies recover from these locally: navigation falls back to the
    /// cached shell, media to the offline document, stale-while-revalidate to
    /// the cached entry. A bad origin status counts as a failed fetch.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            OfflineError::NetworkError(_)
                | OfflineError::Timeout(_)
                | OfflineError::OriginStatus { .. }
        )
    }

    /// Convert error to HTTP status code
    ///
    /// - Malformed requests map to 400, invalid ranges to 416
    /// - Network and origin failures map to 502 (504 for timeouts)
    /// - Everything else is a 500
    pub fn to_http_status(&self) -> u16 {
        match self {
            OfflineError::InvalidRange(_) => 416,
            OfflineError::ParseError(_) => 400,
            OfflineError::NetworkError(_) => 502,
            OfflineError::OriginStatus { .. } => 502,
            OfflineError::InstallFailed { .. } => 502,
            OfflineError::Timeout(_) => 504,
            OfflineError::Unsupported(_) => 501,
            OfflineError::ConfigError(_) => 500,
            OfflineError::StorageError(_) => 500,
            OfflineError::IoError(_) => 500,
            OfflineError::InternalError(_) => 500,
        }
    }

    /// Create an install failure for a precache url
    pub fn install_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        OfflineError::InstallFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an error for an unexpected origin status
    pub fn origin_status(status: u16, url: impl Into<String>) -> Self {
        OfflineError::OriginStatus {
            status,
            url: url.into(),
        }
    }
}
