//! Storage configuration.
//!
//! The database file and the index directory are configured independently:
//! either can be relocated without touching the other, and a missing index is
//! rebuilt from the store wherever it points.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_REFRESH_WORKERS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub index_dir: PathBuf,
    pub refresh_workers: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("eddy");
        Self {
            db_path: base.join("feeds.db"),
            index_dir: base.join("search-index"),
            refresh_workers: DEFAULT_REFRESH_WORKERS,
        }
    }
}

impl StorageConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = StorageConfig::from_toml("").unwrap();
        let defaults = StorageConfig::default();
        assert_eq!(config.db_path, defaults.db_path);
        assert_eq!(config.index_dir, defaults.index_dir);
        assert_eq!(config.refresh_workers, DEFAULT_REFRESH_WORKERS);
    }

    #[test]
    fn test_partial_toml_overrides_one_field() {
        let config = StorageConfig::from_toml("refresh_workers = 8").unwrap();
        assert_eq!(config.refresh_workers, 8);
        assert_eq!(config.db_path, StorageConfig::default().db_path);
    }

    #[test]
    fn test_paths_configured_independently() {
        let config = StorageConfig::from_toml(
            r#"
            db_path = "/data/feeds.db"
            index_dir = "/fast-disk/index"
        "#,
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/data/feeds.db"));
        assert_eq!(config.index_dir, PathBuf::from("/fast-disk/index"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = StorageConfig::load("/no/such/config.toml").unwrap();
        assert_eq!(config.refresh_workers, DEFAULT_REFRESH_WORKERS);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(StorageConfig::from_toml("refresh_workers = \"many\"").is_err());
    }
}
