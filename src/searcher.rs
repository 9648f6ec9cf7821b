//! Search facade and optional capability contracts.
//!
//! `Searcher` is the only trait callers depend on. Engines that maintain
//! derived state expose extra capabilities through the `as_*` probes, which
//! default to `None`; an index-free engine implements nothing beyond the two
//! search methods and callers cannot tell the difference.

use crate::error::Result;
use crate::models::{Article, Feed};
use chrono::{DateTime, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Feed,
    Article,
}

/// One search result, denormalized so a result list renders without extra
/// store lookups.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub kind: HitKind,
    pub id: String,
    /// Owning feed, for article hits.
    pub feed_id: Option<String>,
    pub feed_title: Option<String>,
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub published: Option<DateTime<Utc>>,
    pub score: f64,
}

/// Result of scoring a single known article against a query.
#[derive(Debug, Clone)]
pub struct ArticleMatch {
    pub article_id: String,
    pub score: f64,
    pub snippet: String,
}

pub trait Searcher: Send + Sync {
    /// Rank feeds and articles against the query, best first. `limit` zero
    /// is unbounded. Queries under the minimum length return empty.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Score one article the caller already holds.
    fn search_in_article(&self, article: &Article, query: &str) -> Result<Option<ArticleMatch>>;

    /// Engines with derived state that must track store mutations.
    fn as_listener(&self) -> Option<&dyn ChangeListener> {
        None
    }

    /// Engines that can defer commits across a bulk operation.
    fn as_batch(&self) -> Option<&dyn BatchIndex> {
        None
    }

    /// Engines that can report the size of their derived state.
    fn as_stats(&self) -> Option<&dyn IndexStats> {
        None
    }
}

/// Store-change notifications for engines with derived state.
pub trait ChangeListener: Send + Sync {
    fn feed_updated(&self, feed: &Feed, articles: &[Article]) -> Result<()>;
    fn feed_deleted(&self, feed_id: &str) -> Result<()>;
}

/// Deferred-commit control for bulk updates.
pub trait BatchIndex: Send + Sync {
    fn begin_batch(&self);
    fn flush_batch(&self) -> Result<()>;
}

pub trait IndexStats: Send + Sync {
    fn document_count(&self) -> u64;
}

/// Notify the engine of an updated feed, if it listens. Index failures are
/// logged, never propagated: the store write already committed.
pub fn notify_updated(searcher: &dyn Searcher, feed: &Feed, articles: &[Article]) {
    if let Some(listener) = searcher.as_listener() {
        if let Err(e) = listener.feed_updated(feed, articles) {
            warn!(feed = %feed.id, error = %e, "search engine failed to apply feed update");
        }
    }
}

/// Notify the engine of a deleted feed, if it listens.
pub fn notify_deleted(searcher: &dyn Searcher, feed_id: &str) {
    if let Some(listener) = searcher.as_listener() {
        if let Err(e) = listener.feed_deleted(feed_id) {
            warn!(feed = %feed_id, error = %e, "search engine failed to apply feed deletion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainEngine;

    impl Searcher for PlainEngine {
        fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
        fn search_in_article(
            &self,
            _article: &Article,
            _query: &str,
        ) -> Result<Option<ArticleMatch>> {
            Ok(None)
        }
    }

    #[test]
    fn test_capability_probes_default_to_none() {
        let engine = PlainEngine;
        assert!(engine.as_listener().is_none());
        assert!(engine.as_batch().is_none());
        assert!(engine.as_stats().is_none());
    }

    #[test]
    fn test_notify_helpers_tolerate_plain_engines() {
        let engine = PlainEngine;
        let feed = Feed::new("https://example.com/feed", "F");
        notify_updated(&engine, &feed, &[]);
        notify_deleted(&engine, &feed.id);
    }
}
