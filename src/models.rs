//! Feed and article records plus identity derivation.
//!
//! Identifiers are content-derived, never allocated: a feed's id is a hash of
//! its normalized URL, an article's id a hash of its feed id and GUID. Saving
//! the same logical record twice therefore lands on the same key (upsert).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A subscribed feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// HTTP caching metadata, opaque to this crate.
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub last_fetched: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Feed {
    /// Build a feed with an id derived from the normalized URL.
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            id: feed_id(url),
            url: url.to_string(),
            title: title.to_string(),
            description: String::new(),
            etag: None,
            last_modified: None,
            last_fetched: None,
            updated_at: None,
        }
    }

    /// Title for display and ordering; falls back to the URL when the feed
    /// never provided one.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// A single article belonging to a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub feed_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

impl Article {
    /// Build an article with an id derived from the feed id and GUID.
    /// Feeds without GUIDs get a synthetic identity from url + title, so a
    /// refetch of the same entry still collapses onto one record.
    pub fn new(feed_id: &str, guid: Option<&str>, url: &str, title: &str) -> Self {
        let id = match guid {
            Some(g) if !g.trim().is_empty() => hash_id(&[feed_id, g]),
            _ => hash_id(&[feed_id, url, title]),
        };
        Self {
            id,
            feed_id: feed_id.to_string(),
            title: title.to_string(),
            description: String::new(),
            content: String::new(),
            url: url.to_string(),
            published: None,
            updated: None,
            read: false,
            starred: false,
            media_urls: Vec::new(),
        }
    }

    /// Timestamp used for date ordering. Falls back through `updated` to the
    /// Unix epoch so every article has exactly one position in the by-date
    /// index even when the feed omits dates (such articles sort oldest).
    pub fn sort_timestamp(&self) -> DateTime<Utc> {
        self.published
            .or(self.updated)
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Derive a feed id from its URL: lowercase hex SHA-256, truncated to
/// 16 bytes, over the normalized form.
pub fn feed_id(url: &str) -> String {
    hash_id(&[&normalize_url(url)])
}

fn hash_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Normalize a feed URL so trivially different spellings of the same address
/// map to the same feed id. Lowercases scheme and host, drops the fragment,
/// and strips the trailing slash from an otherwise empty path. Unparseable
/// input falls back to its trimmed form.
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let mut normalized = parsed.to_string();
            if parsed.path() == "/" && parsed.query().is_none() {
                if let Some(stripped) = normalized.strip_suffix('/') {
                    normalized = stripped.to_string();
                }
            }
            normalized
        }
        Err(_) => trimmed.to_string(),
    }
}
