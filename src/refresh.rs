//! Coordination of bulk feed refreshes.
//!
//! A single mutex serializes feed-level read-modify-write sequences; a
//! fixed-size rayon pool caps how many feeds persist concurrently during a
//! bulk refresh. The store provides write correctness on its own, so the pool
//! exists only to bound resource use. Every call blocks until its work is
//! durable; callers own retries and deadlines.

use crate::error::{Error, Result};
use crate::models::{Article, Feed};
use crate::searcher::{notify_deleted, notify_updated, Searcher};
use crate::store::RecordStore;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::warn;

pub struct RefreshCoordinator {
    store: Arc<RecordStore>,
    searcher: Arc<dyn Searcher>,
    op_lock: Mutex<()>,
    pool: rayon::ThreadPool,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<RecordStore>,
        searcher: Arc<dyn Searcher>,
        workers: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()?;
        Ok(Self {
            store,
            searcher,
            op_lock: Mutex::new(()),
            pool,
        })
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn searcher(&self) -> &Arc<dyn Searcher> {
        &self.searcher
    }

    /// Persist one refreshed feed with its articles and notify the search
    /// engine. The store write commits before the notification; an index
    /// failure is logged and never rolls it back.
    pub fn apply(&self, feed: &Feed, articles: &[Article]) -> Result<()> {
        let _guard = self.op_lock.lock();
        self.persist(feed, articles)
    }

    fn persist(&self, feed: &Feed, articles: &[Article]) -> Result<()> {
        self.store.save_feed(feed)?;
        self.store.save_articles(articles)?;
        notify_updated(self.searcher.as_ref(), feed, articles);
        Ok(())
    }

    /// Persist many refreshed feeds across the worker pool, collecting
    /// per-feed errors instead of failing the whole run. Index commits are
    /// batched around the run when the engine supports it.
    pub fn apply_many(&self, batches: &[(Feed, Vec<Article>)]) -> Vec<(String, Error)> {
        let _guard = self.op_lock.lock();

        if let Some(batch) = self.searcher.as_batch() {
            batch.begin_batch();
        }

        let errors: Vec<(String, Error)> = self.pool.install(|| {
            batches
                .par_iter()
                .filter_map(|(feed, articles)| match self.persist(feed, articles) {
                    Ok(()) => None,
                    Err(e) => Some((feed.id.clone(), e)),
                })
                .collect()
        });

        if let Some(batch) = self.searcher.as_batch() {
            if let Err(e) = batch.flush_batch() {
                warn!(error = %e, "search index batch flush failed");
            }
        }

        errors
    }

    pub fn delete_feed(&self, id: &str) -> Result<()> {
        let _guard = self.op_lock.lock();
        self.store.delete_feed(id)?;
        notify_deleted(self.searcher.as_ref(), id);
        Ok(())
    }

    pub fn rename_feed(&self, id: &str, title: &str) -> Result<Feed> {
        let _guard = self.op_lock.lock();
        let feed = self.store.rename_feed(id, title)?;
        notify_updated(self.searcher.as_ref(), &feed, &[]);
        Ok(feed)
    }
}
