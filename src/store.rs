//! Transactional record store for feeds and articles.
//!
//! SQLite via r2d2 pooling: WAL mode lets readers proceed concurrently while
//! writes serialize on a single writer. Records are stored as JSON values in
//! the primary tables; the by-feed and by-date secondary indexes are separate
//! tables maintained explicitly alongside every mutation, never authoritative.
//! A by-date index that disagrees with the primary table degrades reads to a
//! full scan with identical ordering rather than failing.

use crate::datekey;
use crate::error::{Error, Result};
use crate::models::{Article, Feed};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use tracing::warn;

/// Thread-safe store over a pooled SQLite database.
pub struct RecordStore {
    pool: Pool<SqliteConnectionManager>,
}

impl RecordStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=5000;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        let store = Self { pool };
        store.setup_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            Ok(())
        });

        // In-memory needs a single connection to keep its state
        let pool = Pool::builder().max_size(1).build(manager)?;

        let store = Self { pool };
        store.setup_schema()?;
        Ok(store)
    }

    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                feed_id TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feed_articles (
                feed_id TEXT NOT NULL,
                article_id TEXT NOT NULL,
                PRIMARY KEY (feed_id, article_id)
            );

            CREATE TABLE IF NOT EXISTS articles_by_date (
                date_key BLOB PRIMARY KEY,
                article_id TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    // ── Feeds ───────────────────────────────────────────────────

    /// Insert or replace a feed record.
    pub fn save_feed(&self, feed: &Feed) -> Result<()> {
        if feed.url.trim().is_empty() {
            return Err(Error::InvalidInput("feed URL must not be empty".into()));
        }
        if feed.id.trim().is_empty() {
            return Err(Error::InvalidInput("feed id must not be empty".into()));
        }
        let data = serde_json::to_string(feed)?;
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO feeds (id, data) VALUES (?1, ?2)",
            params![feed.id, data],
        )?;
        Ok(())
    }

    pub fn get_feed(&self, id: &str) -> Result<Feed> {
        let conn = self.get_conn()?;
        let data: String = conn
            .query_row("SELECT data FROM feeds WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("feed {}", id)),
                other => other.into(),
            })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// All feeds, sorted case-insensitively by display title.
    pub fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT data FROM feeds")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut feeds = Vec::with_capacity(rows.len());
        for data in rows {
            feeds.push(serde_json::from_str::<Feed>(&data)?);
        }
        feeds.sort_by(|a, b| {
            a.display_title()
                .to_lowercase()
                .cmp(&b.display_title().to_lowercase())
        });
        Ok(feeds)
    }

    /// Change a feed's title. Rejects titles that are empty after trimming.
    pub fn rename_feed(&self, id: &str, title: &str) -> Result<Feed> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("feed title must not be empty".into()));
        }
        let mut feed = self.get_feed(id)?;
        feed.title = title.to_string();
        self.save_feed(&feed)?;
        Ok(feed)
    }

    /// Delete a feed and everything reachable from it: its articles, its
    /// by-feed sub-index, their by-date entries, then the feed record, all in
    /// one transaction.
    pub fn delete_feed(&self, id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM feeds WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(Error::NotFound(format!("feed {}", id)));
        }

        let article_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM articles WHERE feed_id = ?1")?;
            let ids = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        tx.execute("DELETE FROM articles WHERE feed_id = ?1", [id])?;
        tx.execute("DELETE FROM feed_articles WHERE feed_id = ?1", [id])?;
        {
            let mut stmt = tx.prepare("DELETE FROM articles_by_date WHERE article_id = ?1")?;
            for article_id in &article_ids {
                stmt.execute([article_id])?;
            }
        }
        tx.execute("DELETE FROM feeds WHERE id = ?1", [id])?;

        tx.commit()?;
        Ok(())
    }

    // ── Articles ────────────────────────────────────────────────

    /// Batch upsert, all-or-nothing. Both secondary indexes are refreshed per
    /// article: stale entries for the id are removed first, so a re-save that
    /// changes `published` still leaves exactly one by-date entry.
    pub fn save_articles(&self, articles: &[Article]) -> Result<()> {
        if articles.is_empty() {
            return Ok(());
        }
        for article in articles {
            if article.id.trim().is_empty() || article.feed_id.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "article id and feed id must not be empty".into(),
                ));
            }
        }

        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut clear_date = tx.prepare("DELETE FROM articles_by_date WHERE article_id = ?1")?;
            let mut clear_feed = tx.prepare("DELETE FROM feed_articles WHERE article_id = ?1")?;
            let mut put_article =
                tx.prepare("INSERT OR REPLACE INTO articles (id, feed_id, data) VALUES (?1, ?2, ?3)")?;
            let mut put_feed_link =
                tx.prepare("INSERT INTO feed_articles (feed_id, article_id) VALUES (?1, ?2)")?;
            let mut put_date =
                tx.prepare("INSERT INTO articles_by_date (date_key, article_id) VALUES (?1, ?2)")?;

            for article in articles {
                let data = serde_json::to_string(article)?;
                let date_key = datekey::encode(article.sort_timestamp(), &article.id);

                clear_date.execute([&article.id])?;
                clear_feed.execute([&article.id])?;
                put_article.execute(params![article.id, article.feed_id, data])?;
                put_feed_link.execute(params![article.feed_id, article.id])?;
                put_date.execute(params![date_key, article.id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_article(&self, id: &str) -> Result<Article> {
        let conn = self.get_conn()?;
        Self::get_article_on(&conn, id)
    }

    /// Same lookup on an already-held connection, so callers holding a pooled
    /// connection never re-enter the pool.
    fn get_article_on(conn: &rusqlite::Connection, id: &str) -> Result<Article> {
        let data: String = conn
            .query_row("SELECT data FROM articles WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::NotFound(format!("article {}", id))
                }
                other => other.into(),
            })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Newest-first articles without a cursor. `feed_id` empty spans all
    /// feeds; `limit` zero is unbounded.
    pub fn get_articles(&self, feed_id: &str, limit: usize) -> Result<Vec<Article>> {
        self.get_articles_with_cursor(feed_id, limit, None)
    }

    /// Forward-only cursor pagination over the by-date index. The cursor is
    /// the id of the last article the caller has seen; an unknown cursor
    /// restarts from the newest article. Degrades to a full scan with the
    /// identical ordering contract when the index disagrees with the primary
    /// table.
    pub fn get_articles_with_cursor(
        &self,
        feed_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Vec<Article>> {
        let conn = self.get_conn()?;

        if !self.by_date_index_consistent(&conn) {
            warn!("by-date index out of sync with primary table, serving full scan");
            return self.scan_articles(&conn, feed_id, limit, cursor);
        }

        let start_key = self.cursor_start_key(&conn, cursor)?;

        let result = self.indexed_articles(&conn, feed_id, limit, start_key.as_deref());
        match result {
            Ok(articles) => Ok(articles),
            Err(Error::Serialization(e)) => Err(Error::Serialization(e)),
            Err(e) => {
                warn!(error = %e, "by-date index query failed, serving full scan");
                self.scan_articles(&conn, feed_id, limit, cursor)
            }
        }
    }

    /// Resolve the cursor to its resume key. The key is recomputed from the
    /// primary record, so a cursor article that lost its index entry still
    /// resolves.
    fn cursor_start_key(
        &self,
        conn: &rusqlite::Connection,
        cursor: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(id) = cursor else {
            return Ok(None);
        };
        match Self::get_article_on(conn, id) {
            Ok(article) => Ok(Some(datekey::encode(article.sort_timestamp(), &article.id))),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn by_date_index_consistent(&self, conn: &rusqlite::Connection) -> bool {
        let primary: std::result::Result<i64, _> =
            conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0));
        let index: std::result::Result<i64, _> =
            conn.query_row("SELECT COUNT(*) FROM articles_by_date", [], |row| row.get(0));
        matches!((primary, index), (Ok(p), Ok(i)) if p == i)
    }

    fn indexed_articles(
        &self,
        conn: &rusqlite::Connection,
        feed_id: &str,
        limit: usize,
        start_key: Option<&[u8]>,
    ) -> Result<Vec<Article>> {
        let sql_limit: i64 = if limit == 0 { -1 } else { limit as i64 };
        let after: &[u8] = start_key.unwrap_or(&[]);

        let rows: Vec<String> = if feed_id.is_empty() {
            let mut stmt = conn.prepare(
                "SELECT a.data FROM articles_by_date d
                 JOIN articles a ON a.id = d.article_id
                 WHERE d.date_key > ?1
                 ORDER BY d.date_key
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![after, sql_limit], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = conn.prepare(
                "SELECT a.data FROM articles_by_date d
                 JOIN feed_articles fa ON fa.article_id = d.article_id AND fa.feed_id = ?1
                 JOIN articles a ON a.id = d.article_id
                 WHERE d.date_key > ?2
                 ORDER BY d.date_key
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![feed_id, after, sql_limit], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut articles = Vec::with_capacity(rows.len());
        for data in rows {
            articles.push(serde_json::from_str::<Article>(&data)?);
        }
        Ok(articles)
    }

    /// Degraded read path: every article from the primary table, sorted in
    /// memory by the same composite key the index uses, with the same cursor
    /// and limit semantics.
    fn scan_articles(
        &self,
        conn: &rusqlite::Connection,
        feed_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Vec<Article>> {
        let rows: Vec<String> = if feed_id.is_empty() {
            let mut stmt = conn.prepare("SELECT data FROM articles")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = conn.prepare("SELECT data FROM articles WHERE feed_id = ?1")?;
            let rows = stmt
                .query_map([feed_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut articles = Vec::with_capacity(rows.len());
        for data in rows {
            articles.push(serde_json::from_str::<Article>(&data)?);
        }
        articles.sort_by_key(|a| datekey::encode(a.sort_timestamp(), &a.id));

        let start = match cursor {
            Some(id) => articles
                .iter()
                .position(|a| a.id == id)
                .map(|pos| pos + 1)
                .unwrap_or(0),
            None => 0,
        };
        let mut remaining: Vec<Article> = articles.into_iter().skip(start).collect();
        if limit > 0 {
            remaining.truncate(limit);
        }
        Ok(remaining)
    }

    /// Toggle the read state of one article.
    pub fn mark_article_read(&self, id: &str, read: bool) -> Result<Article> {
        self.set_article_flag(id, "$.read", read)
    }

    /// Toggle the starred state of one article.
    pub fn mark_article_starred(&self, id: &str, starred: bool) -> Result<Article> {
        self.set_article_flag(id, "$.starred", starred)
    }

    /// Rewrites one flag inside the stored record in a single UPDATE, so two
    /// concurrent toggles on the same article never clobber each other's
    /// field.
    fn set_article_flag(&self, id: &str, path: &str, value: bool) -> Result<Article> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE articles SET data = json_set(data, ?1, json(?2)) WHERE id = ?3",
            params![path, if value { "true" } else { "false" }, id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("article {}", id)));
        }
        Self::get_article_on(&conn, id)
    }

    // ── Introspection & bulk reads ──────────────────────────────

    pub fn count_articles(&self) -> Result<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_feeds(&self) -> Result<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM feeds", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Every article, decode errors propagated. Used by the heuristic engine.
    pub fn get_all_articles(&self) -> Result<Vec<Article>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT data FROM articles")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        let mut articles = Vec::with_capacity(rows.len());
        for data in rows {
            articles.push(serde_json::from_str::<Article>(&data)?);
        }
        Ok(articles)
    }

    /// Every decodable feed and article, for rebuilding a search index.
    /// Undecodable rows are skipped with a warning instead of aborting the
    /// rebuild.
    pub fn load_all_for_reindex(&self) -> Result<(Vec<Feed>, Vec<Article>)> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare("SELECT id, data FROM feeds")?;
        let feed_rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut feeds = Vec::with_capacity(feed_rows.len());
        for (id, data) in feed_rows {
            match serde_json::from_str::<Feed>(&data) {
                Ok(feed) => feeds.push(feed),
                Err(e) => warn!(feed = %id, error = %e, "skipping undecodable feed during reindex"),
            }
        }

        let mut stmt = conn.prepare("SELECT id, data FROM articles")?;
        let article_rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut articles = Vec::with_capacity(article_rows.len());
        for (id, data) in article_rows {
            match serde_json::from_str::<Article>(&data) {
                Ok(article) => articles.push(article),
                Err(e) => {
                    warn!(article = %id, error = %e, "skipping undecodable article during reindex")
                }
            }
        }

        Ok((feeds, articles))
    }

    /// Corrupt the by-date index (for exercising the degraded read path).
    #[cfg(test)]
    pub fn corrupt_by_date_index(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM articles_by_date", [])?;
        Ok(())
    }
}
