//! Persistent inverted-index search engine backed by tantivy.
//!
//! The index mirrors the record store: one document per feed and per article,
//! addressed by a type-prefixed id term so upserts and deletions are single
//! delete-then-add operations. The reader reloads only on explicit commit,
//! and batch mode defers commits entirely until flushed. Consistency with the
//! store is eventual; a missing index is rebuilt from the store on open.

use crate::error::Result;
use crate::heuristic::article_snippet;
use crate::models::{Article, Feed};
use crate::scoring::{
    self, WEIGHT_CONTENT, WEIGHT_DESCRIPTION, WEIGHT_TITLE, WEIGHT_URL,
};
use crate::searcher::{
    ArticleMatch, BatchIndex, ChangeListener, HitKind, IndexStats, SearchHit, Searcher,
};
use crate::store::RecordStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{info, warn};

/// Exact term matches count double relative to prefix matches.
const EXACT_MATCH_BOOST: f32 = 2.0;
/// Cascade deletion works in pages this size so memory stays bounded for
/// arbitrarily large feeds.
const DELETE_PAGE: usize = 100;

const WRITER_HEAP_BYTES: usize = 50_000_000;

struct IndexFields {
    id: Field,
    kind: Field,
    feed_ref: Field,
    title: Field,
    description: Field,
    content: Field,
    url: Field,
    published: Field,
}

pub struct IndexedSearcher {
    store: Arc<RecordStore>,
    writer: RwLock<IndexWriter>,
    reader: RwLock<IndexReader>,
    fields: IndexFields,
    batching: AtomicBool,
}

impl IndexedSearcher {
    /// Open the index at `path`, creating and populating it from the store
    /// when none exists yet. An existing index is trusted as-is.
    pub fn open(path: &Path, store: Arc<RecordStore>) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let fresh = !Index::exists(&dir).map_err(tantivy::TantivyError::from)?;
        let schema = Self::build_schema();
        let index = Index::open_or_create(dir, schema.clone())?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let engine = Self::from_parts(index, writer, schema, store)?;
        if fresh {
            engine.reindex_all()?;
        }
        Ok(engine)
    }

    /// In-memory index (for testing), populated from the store.
    #[cfg(test)]
    pub fn open_in_memory(store: Arc<RecordStore>) -> Result<Self> {
        let schema = Self::build_schema();
        let index = Index::create_in_ram(schema.clone());
        let writer = index.writer(15_000_000)?;
        let engine = Self::from_parts(index, writer, schema, store)?;
        engine.reindex_all()?;
        Ok(engine)
    }

    fn from_parts(
        index: Index,
        writer: IndexWriter,
        schema: Schema,
        store: Arc<RecordStore>,
    ) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let fields = IndexFields {
            id: schema.get_field("id").expect("schema field"),
            kind: schema.get_field("kind").expect("schema field"),
            feed_ref: schema.get_field("feed_ref").expect("schema field"),
            title: schema.get_field("title").expect("schema field"),
            description: schema.get_field("description").expect("schema field"),
            content: schema.get_field("content").expect("schema field"),
            url: schema.get_field("url").expect("schema field"),
            published: schema.get_field("published").expect("schema field"),
        };
        Ok(Self {
            store,
            writer: RwLock::new(writer),
            reader: RwLock::new(reader),
            fields,
            batching: AtomicBool::new(false),
        })
    }

    fn build_schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("kind", STRING | STORED);
        builder.add_text_field("feed_ref", STRING | STORED);
        builder.add_text_field("title", TEXT | STORED);
        builder.add_text_field("description", TEXT | STORED);
        builder.add_text_field("content", TEXT | STORED);
        builder.add_text_field("url", TEXT | STORED);
        builder.add_i64_field("published", STORED);
        builder.build()
    }

    /// Rebuild the whole index from the store. Undecodable records were
    /// already skipped (with warnings) by the store's lenient bulk read.
    fn reindex_all(&self) -> Result<()> {
        let (feeds, articles) = self.store.load_all_for_reindex()?;
        info!(feeds = feeds.len(), articles = articles.len(), "rebuilding search index");
        {
            let writer = self.writer.read();
            for feed in &feeds {
                self.write_feed_doc(&writer, feed)?;
            }
            for article in &articles {
                self.write_article_doc(&writer, article)?;
            }
        }
        self.commit()
    }

    fn write_feed_doc(&self, writer: &IndexWriter, feed: &Feed) -> Result<()> {
        let doc_id = format!("feed:{}", feed.id);
        writer.delete_term(Term::from_field_text(self.fields.id, &doc_id));

        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.id, &doc_id);
        doc.add_text(self.fields.kind, "feed");
        doc.add_text(self.fields.feed_ref, &feed.id);
        doc.add_text(self.fields.title, &feed.title);
        doc.add_text(self.fields.description, &feed.description);
        doc.add_text(self.fields.url, &feed.url);
        writer.add_document(doc)?;
        Ok(())
    }

    fn write_article_doc(&self, writer: &IndexWriter, article: &Article) -> Result<()> {
        let doc_id = format!("article:{}", article.id);
        writer.delete_term(Term::from_field_text(self.fields.id, &doc_id));

        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.id, &doc_id);
        doc.add_text(self.fields.kind, "article");
        doc.add_text(self.fields.feed_ref, &article.feed_id);
        doc.add_text(self.fields.title, &article.title);
        doc.add_text(self.fields.description, &article.description);
        doc.add_text(self.fields.content, &article.content);
        doc.add_text(self.fields.url, &article.url);
        if let Some(published) = article.published {
            doc.add_i64(self.fields.published, published.timestamp());
        }
        writer.add_document(doc)?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.writer.write().commit()?;
        self.reader.write().reload()?;
        Ok(())
    }

    fn commit_unless_batching(&self) -> Result<()> {
        if self.batching.load(Ordering::Acquire) {
            return Ok(());
        }
        self.commit()
    }

    /// OR-combine, per term and per field, an exact term query and a prefix
    /// query, each boosted by field weight times match-type weight.
    fn build_query(&self, terms: &[String]) -> BooleanQuery {
        let weighted_fields = [
            (self.fields.title, WEIGHT_TITLE),
            (self.fields.description, WEIGHT_DESCRIPTION),
            (self.fields.content, WEIGHT_CONTENT),
            (self.fields.url, WEIGHT_URL),
        ];
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for term in terms {
            for (field, weight) in weighted_fields {
                let tantivy_term = Term::from_field_text(field, term);
                let exact: Box<dyn Query> = Box::new(TermQuery::new(
                    tantivy_term.clone(),
                    IndexRecordOption::WithFreqs,
                ));
                clauses.push((
                    Occur::Should,
                    Box::new(BoostQuery::new(exact, weight * EXACT_MATCH_BOOST)),
                ));

                let prefix: Box<dyn Query> =
                    Box::new(FuzzyTermQuery::new_prefix(tantivy_term, 0, true));
                clauses.push((Occur::Should, Box::new(BoostQuery::new(prefix, weight))));
            }
        }
        BooleanQuery::new(clauses)
    }

    fn hit_from_doc(&self, doc: &TantivyDocument, score: f32, terms: &[String]) -> Option<SearchHit> {
        let raw_id = doc.get_first(self.fields.id)?.as_str()?;
        let kind_str = doc.get_first(self.fields.kind)?.as_str()?;
        let title = doc
            .get_first(self.fields.title)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let description = doc
            .get_first(self.fields.description)
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let content = doc
            .get_first(self.fields.content)
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let url = doc
            .get_first(self.fields.url)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let published = doc
            .get_first(self.fields.published)
            .and_then(|v| v.as_i64())
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));

        let snippet_source = if content.trim().is_empty() { description } else { content };
        let snippet = scoring::make_snippet(snippet_source, terms);

        match kind_str {
            "feed" => {
                let id = raw_id.strip_prefix("feed:")?.to_string();
                Some(SearchHit {
                    kind: HitKind::Feed,
                    id,
                    feed_id: None,
                    feed_title: None,
                    title,
                    snippet,
                    url,
                    published: None,
                    score: score as f64,
                })
            }
            "article" => {
                let id = raw_id.strip_prefix("article:")?.to_string();
                let feed_id = doc
                    .get_first(self.fields.feed_ref)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                Some(SearchHit {
                    kind: HitKind::Article,
                    id,
                    feed_id,
                    feed_title: None, // resolved from the store afterwards
                    title,
                    snippet,
                    url,
                    published,
                    score: score as f64,
                })
            }
            other => {
                warn!(kind = other, "unknown document kind in search index");
                None
            }
        }
    }

    /// Fill in feed titles for article hits from the store; a feed deleted
    /// since the last commit just leaves the title empty.
    fn resolve_feed_titles(&self, hits: &mut [SearchHit]) {
        let mut titles: HashMap<String, Option<String>> = HashMap::new();
        for hit in hits.iter_mut() {
            let Some(feed_id) = hit.feed_id.clone() else {
                continue;
            };
            let title = titles
                .entry(feed_id)
                .or_insert_with_key(|id| {
                    self.store
                        .get_feed(id)
                        .ok()
                        .map(|f| f.display_title().to_string())
                })
                .clone();
            hit.feed_title = title;
        }
    }
}

impl Searcher for IndexedSearcher {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let terms = scoring::query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let reader = self.reader.read();
        let searcher = reader.searcher();
        let fetch = if limit == 0 {
            (searcher.num_docs() as usize).max(1)
        } else {
            limit
        };

        let index_query = self.build_query(&terms);
        let top_docs = searcher.search(&index_query, &TopDocs::with_limit(fetch))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(hit) = self.hit_from_doc(&doc, score, &terms) {
                hits.push(hit);
            }
        }
        drop(reader);

        self.resolve_feed_titles(&mut hits);
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

    fn as_listener(&self) -> Option<&dyn ChangeListener> {
        Some(self)
    }

    fn as_batch(&self) -> Option<&dyn BatchIndex> {
        Some(self)
    }

    fn as_stats(&self) -> Option<&dyn IndexStats> {
        Some(self)
    }
}

impl ChangeListener for IndexedSearcher {
    fn feed_updated(&self, feed: &Feed, articles: &[Article]) -> Result<()> {
        {
            let writer = self.writer.read();
            self.write_feed_doc(&writer, feed)?;
            for article in articles {
                self.write_article_doc(&writer, article)?;
            }
        }
        self.commit_unless_batching()
    }

    /// Remove the feed document, then its articles in fixed-size pages so
    /// memory stays bounded for arbitrarily large feeds. Outside a batch each
    /// page commits before the next query and progress survives
    /// interruption; inside a batch the deletes stay buffered (the committed
    /// snapshot is stable, so the pages walk it by offset) and become
    /// visible at flush.
    fn feed_deleted(&self, feed_id: &str) -> Result<()> {
        {
            let writer = self.writer.read();
            writer.delete_term(Term::from_field_text(
                self.fields.id,
                &format!("feed:{}", feed_id),
            ));
        }
        self.commit_unless_batching()?;

        let batching = self.batching.load(Ordering::Acquire);
        let feed_ref_query = TermQuery::new(
            Term::from_field_text(self.fields.feed_ref, feed_id),
            IndexRecordOption::Basic,
        );
        let mut offset = 0;
        loop {
            let doc_ids: Vec<String> = {
                let reader = self.reader.read();
                let searcher = reader.searcher();
                let collector = TopDocs::with_limit(DELETE_PAGE).and_offset(offset);
                let page = searcher.search(&feed_ref_query, &collector)?;
                let mut ids = Vec::with_capacity(page.len());
                for (_score, doc_address) in page {
                    let doc: TantivyDocument = searcher.doc(doc_address)?;
                    if let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_str()) {
                        ids.push(id.to_string());
                    }
                }
                ids
            };
            if doc_ids.is_empty() {
                break;
            }
            {
                let writer = self.writer.read();
                for doc_id in &doc_ids {
                    writer.delete_term(Term::from_field_text(self.fields.id, doc_id));
                }
            }
            if batching {
                // No reload happens, so step past the still-visible page
                offset += DELETE_PAGE;
            } else {
                self.commit()?;
            }
        }
        Ok(())
    }
}

impl BatchIndex for IndexedSearcher {
    fn begin_batch(&self) {
        self.batching.store(true, Ordering::Release);
    }

    fn flush_batch(&self) -> Result<()> {
        self.batching.store(false, Ordering::Release);
        self.commit()
    }
}

impl IndexStats for IndexedSearcher {
    fn document_count(&self) -> u64 {
        self.reader.read().searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn seeded() -> (Arc<RecordStore>, Feed) {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let feed = Feed::new("https://example.com/feed", "Rust Weekly");
        store.save_feed(&feed).unwrap();
        (store, feed)
    }

    fn article(feed_id: &str, guid: &str, title: &str, content: &str) -> Article {
        let mut a = Article::new(feed_id, Some(guid), "https://example.com/post", title);
        a.content = content.to_string();
        a.published = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        a
    }

    #[test]
    fn test_open_populates_from_store() {
        let (store, feed) = seeded();
        store
            .save_articles(&[article(&feed.id, "g1", "Borrow checker", "deep dive")])
            .unwrap();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();
        // 1 feed doc + 1 article doc
        assert_eq!(engine.document_count(), 2);
    }

    #[test]
    fn test_search_finds_article_by_title() {
        let (store, feed) = seeded();
        store
            .save_articles(&[
                article(&feed.id, "g1", "Borrow checker deep dive", ""),
                article(&feed.id, "g2", "Cooking recipes", ""),
            ])
            .unwrap();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();
        let hits = engine.search("borrow", 10).unwrap();
        let articles: Vec<&SearchHit> =
            hits.iter().filter(|h| h.kind == HitKind::Article).collect();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Borrow checker deep dive");
        assert_eq!(articles[0].feed_title.as_deref(), Some("Rust Weekly"));
    }

    #[test]
    fn test_prefix_query_matches() {
        let (store, feed) = seeded();
        store
            .save_articles(&[article(&feed.id, "g1", "Asynchronous Rust", "")])
            .unwrap();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();
        let hits = engine.search("asynchr", 10).unwrap();
        assert!(hits.iter().any(|h| h.title == "Asynchronous Rust"));
    }

    #[test]
    fn test_short_query_floor() {
        let (store, feed) = seeded();
        store
            .save_articles(&[article(&feed.id, "g1", "Anything", "")])
            .unwrap();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();
        assert!(engine.search("a", 10).unwrap().is_empty());
        assert!(engine.search("  ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_feed_updated_upserts() {
        let (store, feed) = seeded();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();
        let a = article(&feed.id, "g1", "Original title", "");
        engine.feed_updated(&feed, std::slice::from_ref(&a)).unwrap();
        assert_eq!(engine.document_count(), 2);

        let mut updated = a.clone();
        updated.title = "Revised title".to_string();
        engine.feed_updated(&feed, &[updated]).unwrap();
        assert_eq!(engine.document_count(), 2);

        let hits = engine.search("revised", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(engine.search("original", 10).unwrap().is_empty());
    }

    #[test]
    fn test_feed_deleted_pages_through_large_feeds() {
        let (store, feed) = seeded();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();
        // More articles than one deletion page
        let articles: Vec<Article> = (0..(DELETE_PAGE * 2 + 7))
            .map(|i| article(&feed.id, &format!("g{}", i), &format!("Entry {}", i), ""))
            .collect();
        engine.feed_updated(&feed, &articles).unwrap();
        assert_eq!(engine.document_count() as usize, articles.len() + 1);

        engine.feed_deleted(&feed.id).unwrap();
        assert_eq!(engine.document_count(), 0);
    }

    #[test]
    fn test_batch_defers_visibility_until_flush() {
        let (store, feed) = seeded();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();

        engine.begin_batch();
        engine
            .feed_updated(&feed, &[article(&feed.id, "g1", "Batched entry", "")])
            .unwrap();
        assert!(engine.search("batched", 10).unwrap().is_empty());

        engine.flush_batch().unwrap();
        let hits = engine.search("batched", 10).unwrap();
        assert!(hits.iter().any(|h| h.title == "Batched entry"));
    }

    #[test]
    fn test_feed_deleted_during_batch_stays_buffered() {
        let (store, doomed) = seeded();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();
        // Committed multi-page feed, then a batch that deletes it and adds
        // another feed's entry
        let articles: Vec<Article> = (0..(DELETE_PAGE * 2 + 3))
            .map(|i| article(&doomed.id, &format!("g{}", i), &format!("Doomed {}", i), ""))
            .collect();
        engine.feed_updated(&doomed, &articles).unwrap();

        let kept = Feed::new("https://kept.com/feed", "Kept");
        engine.begin_batch();
        engine
            .feed_updated(&kept, &[Article::new(&kept.id, Some("g"), "https://kept.com/p", "Pending entry")])
            .unwrap();
        engine.feed_deleted(&doomed.id).unwrap();

        // Mid-batch nothing committed: the deletion is invisible and so is
        // the pending add
        assert!(!engine.search("doomed", 10).unwrap().is_empty());
        assert!(engine.search("pending", 10).unwrap().is_empty());

        engine.flush_batch().unwrap();
        assert!(engine.search("doomed", 10).unwrap().is_empty());
        assert!(!engine.search("pending", 10).unwrap().is_empty());
        // Only the kept feed doc and its article remain
        assert_eq!(engine.document_count(), 2);
    }

    #[test]
    fn test_capabilities_exposed() {
        let (store, _) = seeded();
        let engine = IndexedSearcher::open_in_memory(store).unwrap();
        assert!(engine.as_listener().is_some());
        assert!(engine.as_batch().is_some());
        assert!(engine.as_stats().is_some());
    }
}
