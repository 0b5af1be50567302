//! Fetching of registry documents and path lists
//!
//! Live fetches go through the listing store and are written through to the
//! [`ListingCache`] when one is configured. Offline, the cache is the only
//! source.

use ccindex_common::types::CrawlId;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{path_list_key, ListingCache, REGISTRY_KEY};
use crate::error::{IngestError, Result};
use crate::manifest::PATH_LIST_NAME;
use crate::transport::{RemoteStore, TransportError};

pub struct Listings {
    store: Arc<dyn RemoteStore>,
    base: String,
    cache: Option<ListingCache>,
    offline: bool,
}

impl Listings {
    /// `base` is the prefix of `crawl-data/<id>/...` and must end with `/`.
    pub fn new(store: Arc<dyn RemoteStore>, base: impl Into<String>) -> Self {
        Self {
            store,
            base: base.into(),
            cache: None,
            offline: false,
        }
    }

    pub fn with_cache(mut self, cache: ListingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn path_list_url(&self, crawl: &CrawlId) -> String {
        format!("{}crawl-data/{}/{}", self.base, crawl, PATH_LIST_NAME)
    }

    pub async fn fetch_registry(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch(REGISTRY_KEY, url, |source| IngestError::RegistryFetch {
            location: url.to_string(),
            source,
        })
        .await
    }

    pub async fn fetch_path_list(&self, crawl: &CrawlId) -> Result<Vec<u8>> {
        let url = self.path_list_url(crawl);
        self.fetch(&path_list_key(crawl), &url, |source| {
            IngestError::PathListFetch {
                crawl: crawl.clone(),
                source,
            }
        })
        .await
    }

    async fn fetch(
        &self,
        key: &str,
        url: &str,
        on_error: impl FnOnce(TransportError) -> IngestError,
    ) -> Result<Vec<u8>> {
        if self.offline {
            let cache = self.cache.as_ref().ok_or(IngestError::OfflineWithoutCache)?;
            debug!(key, "Reading listing from cache");
            return cache.load(key).await;
        }

        let bytes = self.store.get(url).await.map_err(on_error)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(key, &bytes).await {
                warn!(key, error = %e, "Failed to update listing cache");
            }
        }

        Ok(bytes)
    }
}
