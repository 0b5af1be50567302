//! Ingested-state diffing
//!
//! Pending work is always recomputed as "manifest minus catalog inventory".
//! The catalog is the only record of progress, which is what makes runs
//! idempotent and resumable.

use ccindex_common::types::{CrawlId, FileRecord};
use std::collections::HashSet;

use crate::manifest::Manifest;
use crate::transport::DataLocator;

/// Files of one crawl still missing from the catalog, in path order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQueue {
    pub crawl_id: CrawlId,
    /// Manifest files of the crawl
    pub total: usize,
    pub files: Vec<FileRecord>,
}

impl PendingQueue {
    pub fn is_complete(&self) -> bool {
        self.files.is_empty()
    }

    pub fn already_registered(&self) -> usize {
        self.total - self.files.len()
    }
}

/// Registered files of a table, keyed by path relative to the data base.
#[derive(Debug, Clone, Default)]
pub struct RegisteredSet {
    paths: HashSet<String>,
}

impl RegisteredSet {
    /// Normalize catalog locations. Locations recorded under either data base
    /// map to the same relative path.
    pub fn from_locations<I>(locations: I, locator: &DataLocator) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let paths = locations
            .into_iter()
            .map(|location| locator.relative_path(location.as_ref()).to_string())
            .collect();
        Self { paths }
    }

    pub fn contains(&self, record: &FileRecord) -> bool {
        self.paths.contains(&record.path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

pub fn diff_crawl(manifest: &Manifest, crawl: &CrawlId, registered: &RegisteredSet) -> PendingQueue {
    let candidates = manifest.for_crawl(crawl);
    PendingQueue {
        crawl_id: crawl.clone(),
        total: candidates.len(),
        files: candidates
            .iter()
            .filter(|record| !registered.contains(record))
            .cloned()
            .collect(),
    }
}

/// Pending queues of every crawl in the manifest, ascending.
pub fn diff_all(manifest: &Manifest, registered: &RegisteredSet) -> Vec<PendingQueue> {
    manifest
        .crawl_ids()
        .iter()
        .map(|crawl| diff_crawl(manifest, crawl, registered))
        .collect()
}
