//! Core data models for the offline shell cache

use crate::error::{OfflineError, Result};
use bytes::Bytes;
use http::header::{HeaderName, CONTENT_TYPE, RANGE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive byte interval inside a resource of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if `start <= end`
    /// * `Err(OfflineError::InvalidRange)` otherwise
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(OfflineError::InvalidRange(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// Number of bytes covered by this range
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value of the `Content-Range` header for this range of a `total`-byte body
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Identifier of one immutable, versioned set of cached entries
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(String);

impl Generation {
    /// Build the generation id for a deployed version, e.g. `handtap-v6`
    pub fn new(prefix: &str, version: &str) -> Self {
        Generation(format!("{}-{}", prefix, version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Generation {
    fn from(id: &str) -> Self {
        Generation(id.to_string())
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical identity of a cache entry: an absolute URL
///
/// Only GET requests are ever stored, so the method is implied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for an ordinary request: fragment dropped, query kept
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        CacheKey(url.into())
    }

    /// Key for the media asset: query and fragment both dropped
    pub fn canonical(url: &Url) -> Self {
        CacheKey(strip_query_and_fragment(url).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Copy of `url` without query string or fragment
pub fn strip_query_and_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Request mode as seen by the interception layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation
    Navigate,
    /// Same-origin subresource
    SameOrigin,
    /// Opaque cross-origin subresource
    #[default]
    NoCors,
    /// CORS subresource
    Cors,
}

/// An intercepted outgoing request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub body: Bytes,
}

impl FetchRequest {
    /// Plain GET subresource request
    pub fn get(url: Url) -> Self {
        FetchRequest {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            mode: RequestMode::NoCors,
            body: Bytes::new(),
        }
    }

    /// Top-level navigation request
    pub fn navigate(url: Url) -> Self {
        FetchRequest {
            mode: RequestMode::Navigate,
            ..FetchRequest::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Raw `Range` header value, if present and valid ASCII
    pub fn range_header(&self) -> Option<&str> {
        self.headers.get(RANGE).and_then(|v| v.to_str().ok())
    }
}

/// A complete response snapshot: status, headers and the whole body
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 200 response with the given body
    pub fn ok(body: impl Into<Bytes>) -> Self {
        HttpResponse::new(StatusCode::OK, body)
    }

    /// Synthetic failure returned when neither cache nor network can answer
    pub fn failure() -> Self {
        HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE, Bytes::new())
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether this is a full (200) representation of the resource
    pub fn is_full(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Body length in bytes
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_byte_range_new() {
        let range = ByteRange::new(200, 499).unwrap();
        assert_eq!(range.size(), 300);
        assert_eq!(range.content_range(1000), "bytes 200-499/1000");
    }

    #[test]
    fn test_byte_range_invalid() {
        assert!(ByteRange::new(100, 50).is_err());
    }

    #[test]
    fn test_generation_id() {
        let generation = Generation::new("handtap", "v6");
        assert_eq!(generation.as_str(), "handtap-v6");
        assert_eq!(generation.to_string(), "handtap-v6");
    }

    #[test]
    fn test_cache_key_drops_fragment_keeps_query() {
        let key = CacheKey::from_url(&url("http://app.test/style.css?v=2#top"));
        assert_eq!(key.as_str(), "http://app.test/style.css?v=2");
    }

    #[test]
    fn test_canonical_key_strips_query_and_fragment() {
        let a = CacheKey::canonical(&url("http://app.test/assets/hand-loop.mp4?t=12#x"));
        let b = CacheKey::canonical(&url("http://app.test/assets/hand-loop.mp4"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "http://app.test/assets/hand-loop.mp4");
    }

    #[test]
    fn test_fetch_request_range_header() {
        let req = FetchRequest::get(url("http://app.test/a.mp4"))
            .with_header(RANGE, HeaderValue::from_static("bytes=0-99"));
        assert_eq!(req.range_header(), Some("bytes=0-99"));
        assert!(!req.is_navigation());
        assert!(FetchRequest::navigate(url("http://app.test/")).is_navigation());
    }

    #[test]
    fn test_http_response_flags() {
        assert!(HttpResponse::ok("x").is_full());
        assert!(!HttpResponse::new(StatusCode::PARTIAL_CONTENT, "x").is_full());
        assert!(HttpResponse::new(StatusCode::PARTIAL_CONTENT, "x").is_success());
        assert!(!HttpResponse::failure().is_success());
    }
}
