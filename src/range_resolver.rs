//! Resolution of `Range: bytes=<start>-<end>` headers against a known size
//!
//! The resolver never fails: a header that does not follow the single-range
//! grammar is reported as [`RangeResolution::Unparseable`], which callers
//! serve exactly like a request without a Range header.

use crate::models::ByteRange;
use tracing::debug;

/// Outcome of resolving a Range header against a body of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResolution {
    /// No Range header was supplied
    Full,
    /// A Range header was supplied but does not match `bytes=<start>-<end>`
    Unparseable,
    /// Clamped interval with `start <= end <= size - 1`
    Satisfiable(ByteRange),
    /// The requested interval lies outside the body
    Unsatisfiable,
}

/// Resolves client Range headers for cached bodies
pub struct RangeResolver;

impl RangeResolver {
    /// Resolve an optional Range header value against `size` bytes
    ///
    /// Missing `end` defaults to `size - 1`; `end` is clamped to `size - 1`
    /// before any comparison so an out-of-bounds end is never echoed back.
    /// The result is unsatisfiable when `start >= size` or `start > end`
    /// after clamping.
    pub fn resolve(header: Option<&str>, size: u64) -> RangeResolution {
        let header = match header {
            Some(header) => header,
            None => return RangeResolution::Full,
        };

        let (start, end) = match Self::parse(header) {
            Some(bounds) => bounds,
            None => {
                debug!("Ignoring unparseable Range header: {:?}", header);
                return RangeResolution::Unparseable;
            }
        };

        if size == 0 || start >= size {
            debug!(
                "Range start {} is outside body of {} bytes",
                start, size
            );
            return RangeResolution::Unsatisfiable;
        }

        let last = size - 1;
        let end = end.map_or(last, |end| end.min(last));

        match ByteRange::new(start, end) {
            Ok(range) => RangeResolution::Satisfiable(range),
            Err(_) => RangeResolution::Unsatisfiable,
        }
    }

    /// Parse `bytes=<start>-<end?>`
    ///
    /// The start bound is required; suffix ranges (`bytes=-N`) and
    /// multi-range lists are not part of the accepted grammar.
    fn parse(header: &str) -> Option<(u64, Option<u64>)> {
        let ranges = header.trim().strip_prefix("bytes=")?;
        let (start, end) = ranges.split_once('-')?;

        let start = parse_bound(start.trim())?;
        let end = match end.trim() {
            "" => None,
            end => Some(parse_bound(end)?),
        };
        Some((start, end))
    }
}

/// Parse a non-empty run of ASCII digits
///
/// Values past `u64::MAX` saturate: a huge end still clamps to the last
/// byte and a huge start is still beyond the body.
fn parse_bound(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(value.parse::<u64>().unwrap_or(u64::MAX))
}
