//! Listing cache
//!
//! Keeps the last fetched registry document and path lists on disk so a run
//! can be planned or repeated offline. The cache is never a record of
//! progress; only the catalog is.

use ccindex_common::types::CrawlId;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::manifest::PATH_LIST_NAME;

pub const REGISTRY_KEY: &str = "collinfo.json";

/// Cache key of a crawl's path list, mirroring its remote path.
pub fn path_list_key(crawl: &CrawlId) -> String {
    format!("crawl-data/{}/{}", crawl, PATH_LIST_NAME)
}

#[derive(Debug, Clone)]
pub struct ListingCache {
    root: PathBuf,
}

impl ListingCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Write `bytes` under `key`, replacing any previous entry atomically.
    pub async fn store(&self, key: &str, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = path.with_extension("partial");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Cached listing");
        Ok(())
    }

    pub async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path(key);
        tokio::fs::read(&path)
            .await
            .map_err(|source| IngestError::Cache { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        let cache = ListingCache::new(dir.path());
        let crawl: CrawlId = "CC-MAIN-2013-20".parse().unwrap();
        let key = path_list_key(&crawl);

        cache.store(&key, b"first").await.unwrap();
        cache.store(&key, b"second").await.unwrap();

        assert_eq!(cache.load(&key).await.unwrap(), b"second".to_vec());
        assert!(dir
            .path()
            .join("crawl-data/CC-MAIN-2013-20/cc-index-table.paths.gz")
            .is_file());
    }

    #[tokio::test]
    async fn test_missing_entry_is_a_cache_error() {
        let dir = TempDir::new().unwrap();
        let cache = ListingCache::new(dir.path());
        assert!(matches!(
            cache.load(REGISTRY_KEY).await,
            Err(IngestError::Cache { .. })
        ));
    }
}
