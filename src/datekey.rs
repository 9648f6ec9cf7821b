//! Composite key encoding for the by-date secondary index.
//!
//! The key is the bitwise complement of the nanosecond epoch timestamp as
//! 8 big-endian bytes, followed by the article id. Under memcmp ordering
//! (SQLite BLOB comparison) ascending keys walk articles newest-first, with
//! equal timestamps breaking ties by article id ascending. Pre-epoch
//! timestamps clamp to the epoch (a negative count reinterpreted as `u64`
//! would complement to a near-zero key and sort as newest), so anything
//! dated before 1970 shares the oldest position.

use chrono::{DateTime, Utc};

/// Encode the by-date index key for an article.
pub fn encode(ts: DateTime<Utc>, article_id: &str) -> Vec<u8> {
    let nanos = ts
        .timestamp_nanos_opt()
        .unwrap_or_else(|| ts.timestamp().saturating_mul(1_000_000_000))
        .max(0);
    let inverted = !(nanos as u64);
    let mut key = Vec::with_capacity(8 + article_id.len());
    key.extend_from_slice(&inverted.to_be_bytes());
    key.extend_from_slice(article_id.as_bytes());
    key
}

/// Extract the article id from an encoded key.
pub fn article_id(key: &[u8]) -> Option<&str> {
    key.get(8..).and_then(|bytes| std::str::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_newer_timestamp_sorts_first() {
        let older = encode(ts(1_700_000_000), "a");
        let newer = encode(ts(1_700_000_001), "a");
        assert!(newer < older, "newer article must have the smaller key");
    }

    #[test]
    fn test_nanosecond_resolution() {
        let base = Utc.timestamp_opt(1_700_000_000, 1).unwrap();
        let later = Utc.timestamp_opt(1_700_000_000, 2).unwrap();
        assert!(encode(later, "a") < encode(base, "a"));
    }

    #[test]
    fn test_tie_breaks_by_id_ascending() {
        let t = ts(1_700_000_000);
        let a = encode(t, "article-a");
        let b = encode(t, "article-b");
        assert!(a < b);
    }

    #[test]
    fn test_epoch_sorts_last() {
        let epoch = encode(DateTime::UNIX_EPOCH, "a");
        let recent = encode(ts(1_700_000_000), "a");
        assert!(recent < epoch, "dateless articles sort after dated ones");
    }

    #[test]
    fn test_pre_epoch_clamps_to_oldest() {
        let sixties = encode(ts(-10_000_000), "a");
        let epoch = encode(DateTime::UNIX_EPOCH, "a");
        let recent = encode(ts(1_700_000_000), "a");
        assert_eq!(sixties, epoch, "pre-epoch dates share the epoch key");
        assert!(recent < sixties, "a 1969 date must never sort as newest");
    }

    #[test]
    fn test_article_id_round_trip() {
        let key = encode(ts(1_700_000_000), "some-article-id");
        assert_eq!(article_id(&key), Some("some-article-id"));
    }

    #[test]
    fn test_key_layout() {
        let key = encode(ts(0), "x");
        assert_eq!(key.len(), 9);
        // timestamp 0 → complement is all ones
        assert_eq!(&key[..8], &[0xff; 8]);
    }
}
