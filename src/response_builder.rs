//! Partial response construction for the cached media body

use crate::error::{OfflineError, Result};
use crate::models::{ByteRange, HttpResponse};
use crate::range_resolver::RangeResolution;
use bytes::Bytes;
use http::header::{
    HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use http::StatusCode;
use tracing::debug;

/// Builds 200/206/416 responses from a fully cached body
#[derive(Debug, Clone)]
pub struct PartialResponseBuilder {
    content_type: HeaderValue,
    cache_control: HeaderValue,
}

impl PartialResponseBuilder {
    /// Create a builder stamping the given Content-Type and Cache-Control
    pub fn new(content_type: &str, cache_control: &str) -> Result<Self> {
        Ok(PartialResponseBuilder {
            content_type: header_value(content_type)?,
            cache_control: header_value(cache_control)?,
        })
    }

    /// Build the response for `resolution` over the complete `body`
    ///
    /// - `Satisfiable` → 206 with the inclusive slice and a matching Content-Range
    /// - `Unsatisfiable` → 416 with `Content-Range: bytes */{size}` and no body
    /// - `Full` / `Unparseable` → 200 with the whole body
    ///
    /// Every variant advertises `Accept-Ranges: bytes` so media elements know
    /// they may seek with later range requests.
    pub fn build(&self, resolution: &RangeResolution, body: &Bytes) -> Result<HttpResponse> {
        let size = body.len() as u64;

        match resolution {
            RangeResolution::Satisfiable(range) => self.partial(*range, size, body),
            RangeResolution::Unsatisfiable => {
                debug!("Building 416 response for body of {} bytes", size);
                let mut response = HttpResponse::new(StatusCode::RANGE_NOT_SATISFIABLE, Bytes::new());
                response
                    .headers
                    .insert(CONTENT_RANGE, header_value(&format!("bytes */{}", size))?);
                response.headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
                response
                    .headers
                    .insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
                Ok(response)
            }
            RangeResolution::Full | RangeResolution::Unparseable => {
                debug!("Building full 200 response of {} bytes", size);
                let mut response = HttpResponse::ok(body.clone());
                self.stamp_common(&mut response, size);
                Ok(response)
            }
        }
    }

    fn partial(&self, range: ByteRange, size: u64, body: &Bytes) -> Result<HttpResponse> {
        if range.end >= size {
            return Err(OfflineError::InvalidRange(format!(
                "Range end {} exceeds body size {}",
                range.end, size
            )));
        }

        let start = usize::try_from(range.start)
            .map_err(|e| OfflineError::InvalidRange(e.to_string()))?;
        let end = usize::try_from(range.end)
            .map_err(|e| OfflineError::InvalidRange(e.to_string()))?;

        debug!(
            "Building 206 response: {}-{}/{} ({} bytes)",
            range.start,
            range.end,
            size,
            range.size()
        );

        let mut response =
            HttpResponse::new(StatusCode::PARTIAL_CONTENT, body.slice(start..=end));
        self.stamp_common(&mut response, range.size());
        response
            .headers
            .insert(CONTENT_RANGE, header_value(&range.content_range(size))?);
        Ok(response)
    }

    fn stamp_common(&self, response: &mut HttpResponse, content_length: u64) {
        let headers = &mut response.headers;
        headers.insert(CONTENT_TYPE, self.content_type.clone());
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CACHE_CONTROL, self.cache_control.clone());
    }
}

impl Default for PartialResponseBuilder {
    fn default() -> Self {
        PartialResponseBuilder {
            content_type: HeaderValue::from_static("video/mp4"),
            cache_control: HeaderValue::from_static("public, max-age=31536000, immutable"),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| OfflineError::InternalError(format!("Invalid header value: {}", e)))
}
