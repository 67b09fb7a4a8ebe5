//! Request classification for choosing a serving strategy

use crate::config::OfflineConfig;
use crate::error::Result;
use crate::models::{strip_query_and_fragment, CacheKey, FetchRequest};
use http::Method;
use reqwest::Url;
use tracing::debug;

/// Why a request is left to the default transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    NonGet,
    CrossOrigin,
}

/// Strategy chosen for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted
    Passthrough(PassthroughReason),
    /// Network first, cached shell document on failure
    Navigation,
    /// Full body from cache (fetched once if missing), sliced per Range header
    Media,
    /// Cached entry now, refreshed from the network in the background
    StaleWhileRevalidate,
}

impl Strategy {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Passthrough(PassthroughReason::NonGet) => "passthrough_non_get",
            Strategy::Passthrough(PassthroughReason::CrossOrigin) => "passthrough_cross_origin",
            Strategy::Navigation => "navigation",
            Strategy::Media => "media",
            Strategy::StaleWhileRevalidate => "stale_while_revalidate",
        }
    }
}

/// Classifies intercepted requests
///
/// Classification uses only the method, the navigation mode and the URL.
pub struct RequestRouter {
    scope: Url,
    media_url: Url,
}

impl RequestRouter {
    /// Create a router for the configured scope and media asset
    pub fn new(config: &OfflineConfig) -> Result<Self> {
        Ok(RequestRouter {
            scope: config.scope_url()?,
            media_url: config.media_url()?,
        })
    }

    /// Classify a request; first match wins
    ///
    /// 1. non-GET → passthrough
    /// 2. navigation → navigation strategy
    /// 3. same-origin media path → media strategy
    /// 4. other same-origin → stale-while-revalidate
    /// 5. cross-origin → passthrough
    pub fn classify(&self, request: &FetchRequest) -> Strategy {
        let strategy = if request.method != Method::GET {
            Strategy::Passthrough(PassthroughReason::NonGet)
        } else if request.is_navigation() {
            Strategy::Navigation
        } else if !self.is_same_origin(&request.url) {
            Strategy::Passthrough(PassthroughReason::CrossOrigin)
        } else if self.is_media(&request.url) {
            Strategy::Media
        } else {
            Strategy::StaleWhileRevalidate
        };

        debug!(
            "Classified {} {} as {}",
            request.method,
            request.url,
            strategy.as_str()
        );
        strategy
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin()
    }

    /// Same origin and exactly the media asset's path; query and fragment ignored
    pub fn is_media(&self, url: &Url) -> bool {
        self.is_same_origin(url) && url.path() == self.media_url.path()
    }

    /// Canonical cache key of the media asset
    pub fn media_key(&self) -> CacheKey {
        CacheKey::canonical(&self.media_url)
    }

    /// URL used for the full-body media fetch
    pub fn media_url(&self) -> &Url {
        &self.media_url
    }

    /// Cache key for a request handled by a non-media strategy
    pub fn key_for(&self, url: &Url) -> CacheKey {
        if self.is_media(url) {
            CacheKey::canonical(&strip_query_and_fragment(url))
        } else {
            CacheKey::from_url(url)
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestMode;

    fn router() -> RequestRouter {
        let config = OfflineConfig {
            scope: "http://app.test/hand/".to_string(),
            ..Default::default()
        };
        RequestRouter::new(&config).unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_non_get_passthrough() {
        let req = FetchRequest::get(url("http://app.test/hand/index.html")).with_method(Method::POST);
        assert_eq!(
            router().classify(&req),
            Strategy::Passthrough(PassthroughReason::NonGet)
        );
    }

    #[test]
    fn test_non_get_navigation_passthrough() {
        let req = FetchRequest::navigate(url("http://app.test/hand/")).with_method(Method::POST);
        assert_eq!(
            router().classify(&req),
            Strategy::Passthrough(PassthroughReason::NonGet)
        );
    }

    #[test]
    fn test_navigation() {
        let req = FetchRequest::navigate(url("http://app.test/hand/"));
        assert_eq!(router().classify(&req), Strategy::Navigation);
    }

    #[test]
    fn test_media_with_query() {
        let req = FetchRequest::get(url("http://app.test/hand/assets/hand-loop.mp4?t=3#frag"));
        assert_eq!(router().classify(&req), Strategy::Media);
    }

    #[test]
    fn test_other_mp4_is_not_media() {
        let req = FetchRequest::get(url("http://app.test/hand/assets/hand-loop2.mp4"));
        assert_eq!(router().classify(&req), Strategy::StaleWhileRevalidate);
    }

    #[test]
    fn test_same_origin_other() {
        let req = FetchRequest::get(url("http://app.test/hand/icons/icon-192.png"))
            .with_mode(RequestMode::SameOrigin);
        assert_eq!(router().classify(&req), Strategy::StaleWhileRevalidate);
    }

    #[test]
    fn test_cross_origin_passthrough() {
        for target in [
            "https://cdn.example.com/hand/assets/hand-loop.mp4",
            "https://app.test/hand/index.html",
            "http://app.test:8081/hand/index.html",
        ] {
            let req = FetchRequest::get(url(target));
            assert_eq!(
                router().classify(&req),
                Strategy::Passthrough(PassthroughReason::CrossOrigin),
                "{}",
                target
            );
        }
    }

    #[test]
    fn test_media_key_is_canonical() {
        let router = router();
        assert_eq!(
            router.media_key().as_str(),
            "http://app.test/hand/assets/hand-loop.mp4"
        );
        assert_eq!(
            router.key_for(&url("http://app.test/hand/assets/hand-loop.mp4?x=1")),
            router.media_key()
        );
        assert_eq!(
            router.key_for(&url("http://app.test/hand/app.js?x=1#y")).as_str(),
            "http://app.test/hand/app.js?x=1"
        );
    }
}
