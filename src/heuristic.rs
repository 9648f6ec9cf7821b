//! Index-free search engine.
//!
//! Scans every record on every call and ranks with the shared scoring
//! functions. No derived state means nothing to keep consistent: this engine
//! exposes no capabilities and is the fallback when the persistent index
//! cannot be opened.

use crate::error::Result;
use crate::models::Article;
use crate::scoring::{
    self, WEIGHT_CONTENT, WEIGHT_DESCRIPTION, WEIGHT_TITLE, WEIGHT_URL,
};
use crate::searcher::{ArticleMatch, HitKind, SearchHit, Searcher};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub struct HeuristicSearcher {
    store: Arc<RecordStore>,
}

impl HeuristicSearcher {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    fn score_article(
        article: &Article,
        feed_title: Option<&str>,
        terms: &[String],
        now: DateTime<Utc>,
    ) -> Option<SearchHit> {
        let base = scoring::score_fields(
            &[
                (&article.title, WEIGHT_TITLE),
                (&article.description, WEIGHT_DESCRIPTION),
                (&article.content, WEIGHT_CONTENT),
                (&article.url, WEIGHT_URL),
            ],
            terms,
        );
        if base == 0.0 {
            return None;
        }
        let score = base * scoring::recency_boost(article.published, now);
        Some(SearchHit {
            kind: HitKind::Article,
            id: article.id.clone(),
            feed_id: Some(article.feed_id.clone()),
            feed_title: feed_title.map(|t| t.to_string()),
            title: article.title.clone(),
            snippet: article_snippet(article, terms),
            url: article.url.clone(),
            published: article.published,
            score,
        })
    }
}

/// Snippet from the content, falling back to the description when the feed
/// ships content-less entries.
pub(crate) fn article_snippet(article: &Article, terms: &[String]) -> String {
    let source = if article.content.trim().is_empty() {
        &article.description
    } else {
        &article.content
    };
    scoring::make_snippet(source, terms)
}

/// Sort hits best-first: score descending, then newer publish date, then id
/// for a stable total order.
pub(crate) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.published.cmp(&a.published))
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl Searcher for HeuristicSearcher {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let terms = scoring::query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let feeds = self.store.get_all_feeds()?;
        let articles = self.store.get_all_articles()?;
        let feed_titles: HashMap<&str, &str> = feeds
            .iter()
            .map(|f| (f.id.as_str(), f.display_title()))
            .collect();
        let now = Utc::now();

        let mut hits = Vec::new();
        for feed in &feeds {
            let score = scoring::score_fields(
                &[
                    (&feed.title, WEIGHT_TITLE),
                    (&feed.description, WEIGHT_DESCRIPTION),
                    (&feed.url, WEIGHT_URL),
                ],
                &terms,
            );
            if score > 0.0 {
                hits.push(SearchHit {
                    kind: HitKind::Feed,
                    id: feed.id.clone(),
                    feed_id: None,
                    feed_title: None,
                    title: feed.display_title().to_string(),
                    snippet: scoring::make_snippet(&feed.description, &terms),
                    url: feed.url.clone(),
                    published: None,
                    score,
                });
            }
        }
        for article in &articles {
            if let Some(hit) = Self::score_article(
                article,
                feed_titles.get(article.feed_id.as_str()).copied(),
                &terms,
                now,
            ) {
                hits.push(hit);
            }
        }

        sort_hits(&mut hits);
        if limit > 0 {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    fn search_in_article(&self, article: &Article, query: &str) -> Result<Option<ArticleMatch>> {
        let terms = scoring::query_terms(query);
        if terms.is_empty() {
            return Ok(None);
        }
        let score = scoring::score_fields(
            &[
                (&article.title, WEIGHT_TITLE),
                (&article.description, WEIGHT_DESCRIPTION),
                (&article.content, WEIGHT_CONTENT),
                (&article.url, WEIGHT_URL),
            ],
            &terms,
        );
        if score == 0.0 {
            return Ok(None);
        }
        Ok(Some(ArticleMatch {
            article_id: article.id.clone(),
            score,
            snippet: article_snippet(article, &terms),
        }))
    }
}
