//! eddy — feed storage and search core.
//!
//! A transactional record store for feeds and articles (SQLite, with by-feed
//! and by-date secondary indexes and cursor pagination) behind a search
//! facade with two interchangeable engines: a persistent tantivy index and an
//! index-free heuristic scanner. Engines advertise optional capabilities
//! (change listening, batch commits, stats) by probing, so callers never
//! depend on which engine is active.

pub mod config;
pub mod datekey;
mod error;
pub mod heuristic;
pub mod indexer;
pub mod models;
pub mod refresh;
pub mod scoring;
pub mod searcher;
pub mod store;

pub use config::StorageConfig;
pub use error::{Error, Result};
pub use heuristic::HeuristicSearcher;
pub use indexer::IndexedSearcher;
pub use models::{Article, Feed};
pub use refresh::RefreshCoordinator;
pub use searcher::{
    notify_deleted, notify_updated, ArticleMatch, BatchIndex, ChangeListener, HitKind,
    IndexStats, SearchHit, Searcher,
};
pub use store::RecordStore;

use std::sync::Arc;
use tracing::warn;

/// The assembled core: store, active search engine, refresh coordinator.
pub struct Core {
    pub store: Arc<RecordStore>,
    pub searcher: Arc<dyn Searcher>,
    pub refresh: RefreshCoordinator,
}

impl Core {
    /// Open everything from configuration. Prefers the persistent indexed
    /// engine; when the index cannot be opened the core degrades to the
    /// heuristic engine with a warning instead of failing to start.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let store = Arc::new(RecordStore::open(&config.db_path)?);

        let searcher: Arc<dyn Searcher> =
            match IndexedSearcher::open(&config.index_dir, store.clone()) {
                Ok(engine) => Arc::new(engine),
                Err(e) => {
                    warn!(error = %e, "search index unavailable, using heuristic engine");
                    Arc::new(HeuristicSearcher::new(store.clone()))
                }
            };

        let refresh =
            RefreshCoordinator::new(store.clone(), searcher.clone(), config.refresh_workers)?;

        Ok(Self {
            store,
            searcher,
            refresh,
        })
    }
}
