//! Byte-range resolution for resumable downloads.
//!
//! Supports the single-range forms `bytes=S-E`, `bytes=S-`, and `bytes=-N`.
//! Multi-range requests are not supported and are rejected as unsatisfiable.

use crate::error::{ApiError, ApiResult};

/// An inclusive byte span within an artifact of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` descriptor for a 206 response.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Resolve a `Range` header value against an artifact of `len` bytes.
///
/// An open end (`S-`) runs to EOF; a suffix (`-N`) means the last N bytes,
/// clamped to the whole file when N exceeds it; an end past EOF is clamped.
/// Anything else — multi-range, start past EOF, inverted spans, garbage —
/// fails `RangeNotSatisfiable` carrying the actual length.
pub fn resolve_range(header: &str, len: u64) -> ApiResult<ByteRange> {
    let unsatisfiable = || ApiError::RangeNotSatisfiable { len };

    let spec = header.trim().strip_prefix("bytes=").ok_or_else(unsatisfiable)?;
    if spec.contains(',') {
        // Single range only; a multi-range request is a stated non-goal.
        return Err(unsatisfiable());
    }

    let (start_str, end_str) = spec.split_once('-').ok_or_else(unsatisfiable)?;
    let start_str = start_str.trim();
    let end_str = end_str.trim();

    let range = if start_str.is_empty() {
        // Suffix form: the last N bytes.
        let suffix: u64 = end_str.parse().map_err(|_| unsatisfiable())?;
        if suffix == 0 || len == 0 {
            return Err(unsatisfiable());
        }
        ByteRange {
            start: len.saturating_sub(suffix),
            end: len - 1,
        }
    } else {
        let start: u64 = start_str.parse().map_err(|_| unsatisfiable())?;
        if start >= len {
            return Err(unsatisfiable());
        }
        let end = if end_str.is_empty() {
            len - 1
        } else {
            let end: u64 = end_str.parse().map_err(|_| unsatisfiable())?;
            end.min(len - 1)
        };
        if start > end {
            return Err(unsatisfiable());
        }
        ByteRange { start, end }
    };

    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(header: &str, len: u64) -> (u64, u64) {
        let r = resolve_range(header, len).unwrap();
        (r.start, r.end)
    }

    fn rejected(header: &str, len: u64) -> bool {
        matches!(
            resolve_range(header, len),
            Err(ApiError::RangeNotSatisfiable { .. })
        )
    }

    #[test]
    fn test_explicit_span() {
        assert_eq!(ok("bytes=0-99", 1000), (0, 99));
        assert_eq!(resolve_range("bytes=0-99", 1000).unwrap().len(), 100);
        assert_eq!(ok("bytes=500-500", 1000), (500, 500));
    }

    #[test]
    fn test_open_end_runs_to_eof() {
        assert_eq!(ok("bytes=900-", 1000), (900, 999));
        assert_eq!(resolve_range("bytes=900-", 1000).unwrap().len(), 100);
    }

    #[test]
    fn test_suffix() {
        assert_eq!(ok("bytes=-100", 1000), (900, 999));
        // A suffix longer than the file covers the whole file.
        assert_eq!(ok("bytes=-5000", 1000), (0, 999));
        assert!(rejected("bytes=-0", 1000));
    }

    #[test]
    fn test_end_clamped_to_eof() {
        assert_eq!(ok("bytes=0-99999", 1000), (0, 999));
    }

    #[test]
    fn test_start_past_eof() {
        assert!(rejected("bytes=2000-3000", 1000));
        assert!(rejected("bytes=1000-", 1000));
    }

    #[test]
    fn test_inverted_span() {
        assert!(rejected("bytes=500-100", 1000));
    }

    #[test]
    fn test_multi_range_unsupported() {
        assert!(rejected("bytes=0-99,200-299", 1000));
    }

    #[test]
    fn test_malformed() {
        assert!(rejected("bytes=", 1000));
        assert!(rejected("bytes=abc-", 1000));
        assert!(rejected("bytes=1-x", 1000));
        assert!(rejected("chunks=0-99", 1000));
        assert!(rejected("0-99", 1000));
    }

    #[test]
    fn test_empty_file() {
        assert!(rejected("bytes=0-", 0));
        assert!(rejected("bytes=-1", 0));
    }

    #[test]
    fn test_content_range_descriptor() {
        let r = resolve_range("bytes=0-99", 1000).unwrap();
        assert_eq!(r.content_range(1000), "bytes 0-99/1000");
    }
}
