//! Crate-wide error taxonomy.
//!
//! One enum covers both storage and index failures so callers see a single
//! `Result` type across the facade. Secondary-index read problems never
//! surface here: the store degrades to a full scan instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("index error: {0}")]
    Index(#[from] tantivy::TantivyError),
    #[error("index directory error: {0}")]
    IndexDir(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker pool error: {0}")]
    Worker(#[from] rayon::ThreadPoolBuildError),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
