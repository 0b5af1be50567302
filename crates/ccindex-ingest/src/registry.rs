//! Crawl registry loading
//!
//! The registry (`collinfo.json`) lists every published crawl. Only its `id`
//! fields matter here. Crawls predating the columnar index are kept in the
//! parsed list but marked unsupported.

use ccindex_common::types::CrawlId;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{DEFAULT_REGISTRY_URL, LOCAL_REGISTRY_FILE};
use crate::error::{IngestError, Result};
use crate::listing::Listings;

/// Crawls published before the columnar index format existed.
pub const LEGACY_CRAWLS: [&str; 3] = ["CC-MAIN-2012", "CC-MAIN-2009-2010", "CC-MAIN-2008-2009"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlPeriod {
    pub id: CrawlId,
    pub supported: bool,
}

#[derive(Deserialize)]
struct RegistryEntry {
    id: String,
}

/// Where the registry document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySource {
    File(PathBuf),
    Remote(String),
}

impl RegistrySource {
    /// An explicit path or URL wins. Otherwise a `collinfo.json` in
    /// `working_dir` is preferred over the published registry.
    pub fn resolve(explicit: Option<&str>, working_dir: &Path) -> Self {
        match explicit {
            Some(location) if location.starts_with("http://") || location.starts_with("https://") => {
                RegistrySource::Remote(location.to_string())
            },
            Some(path) => RegistrySource::File(PathBuf::from(path)),
            None => {
                let local = working_dir.join(LOCAL_REGISTRY_FILE);
                if local.is_file() {
                    RegistrySource::File(local)
                } else {
                    RegistrySource::Remote(DEFAULT_REGISTRY_URL.to_string())
                }
            },
        }
    }
}

impl fmt::Display for RegistrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrySource::File(path) => write!(f, "{}", path.display()),
            RegistrySource::Remote(url) => f.write_str(url),
        }
    }
}

/// Parse a registry document into crawl periods, ascending and deduplicated.
pub fn parse_registry(bytes: &[u8]) -> Result<Vec<CrawlPeriod>> {
    let entries: Vec<RegistryEntry> = serde_json::from_slice(bytes).map_err(IngestError::RegistryParse)?;

    let mut ids = entries
        .into_iter()
        .map(|entry| entry.id.parse::<CrawlId>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(IngestError::InvalidCrawlId)?;
    ids.sort();
    ids.dedup();

    Ok(ids
        .into_iter()
        .map(|id| CrawlPeriod {
            supported: !LEGACY_CRAWLS.contains(&id.as_str()),
            id,
        })
        .collect())
}

pub fn supported_crawls(periods: &[CrawlPeriod]) -> Vec<CrawlId> {
    periods
        .iter()
        .filter(|period| period.supported)
        .map(|period| period.id.clone())
        .collect()
}

/// Load and parse the registry. Any failure is fatal for the run.
pub async fn load_registry(source: &RegistrySource, listings: &Listings) -> Result<Vec<CrawlPeriod>> {
    let bytes = match source {
        RegistrySource::File(path) => {
            tokio::fs::read(path)
                .await
                .map_err(|source| IngestError::RegistryRead {
                    path: path.clone(),
                    source,
                })?
        },
        RegistrySource::Remote(url) => listings.fetch_registry(url).await?,
    };

    let periods = parse_registry(&bytes)?;
    let excluded: Vec<&str> = periods
        .iter()
        .filter(|p| !p.supported)
        .map(|p| p.id.as_str())
        .collect();
    if !excluded.is_empty() {
        warn!(crawls = ?excluded, "Skipping crawls without a columnar index");
    }

    info!(
        source = %source,
        crawls = periods.len(),
        supported = periods.len() - excluded.len(),
        "Loaded crawl registry"
    );
    Ok(periods)
}
