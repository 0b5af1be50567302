//! Manifest construction
//!
//! Each crawl publishes a gzip-compressed path list, one relative data file
//! path per line. The manifest merges the lists of all supported crawls into
//! one sorted, deduplicated sequence. It is rebuilt from live listings on
//! every run.

use ccindex_common::types::{CrawlId, FileRecord};
use flate2::read::MultiGzDecoder;
use std::io::{self, Read};
use tracing::{info, warn};

use crate::cancel::CancellationController;
use crate::error::{IngestError, Result};
use crate::listing::Listings;

pub const PATH_LIST_NAME: &str = "cc-index-table.paths.gz";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Every candidate data file, ordered by `(crawl_id, path)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    records: Vec<FileRecord>,
}

impl Manifest {
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let mut records: Vec<FileRecord> = records.into_iter().collect();
        records.sort();
        records.dedup();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }

    /// The oldest crawl's first file.
    pub fn first(&self) -> Option<&FileRecord> {
        self.records.first()
    }

    /// The file a new table takes its columns from: the newest file of a
    /// crawl before `before` (any crawl when `None`). When no crawl is that
    /// old, the oldest file.
    pub fn bootstrap_file(&self, before: Option<&CrawlId>) -> Option<&FileRecord> {
        let end = match before {
            Some(limit) => self.records.partition_point(|r| r.crawl_id < *limit),
            None => self.records.len(),
        };
        self.records[..end].last().or_else(|| self.first())
    }

    /// Files of `crawl`, in path order.
    pub fn for_crawl(&self, crawl: &CrawlId) -> &[FileRecord] {
        let start = self.records.partition_point(|r| r.crawl_id < *crawl);
        let end = self.records.partition_point(|r| r.crawl_id <= *crawl);
        &self.records[start..end]
    }

    /// Distinct crawl ids, ascending.
    pub fn crawl_ids(&self) -> Vec<CrawlId> {
        let mut ids: Vec<CrawlId> = self.records.iter().map(|r| r.crawl_id.clone()).collect();
        ids.dedup();
        ids
    }
}

/// Whether `path` lies inside the hive partition of `crawl`.
pub fn belongs_to(crawl: &CrawlId, path: &str) -> bool {
    path.contains(&format!("/crawl={}/", crawl))
}

/// Decode a path list. Entries outside the crawl's own partition are dropped.
pub fn parse_path_list(crawl: &CrawlId, bytes: &[u8]) -> Result<Vec<FileRecord>> {
    let text = decode(bytes).map_err(|source| IngestError::PathListDecode {
        crawl: crawl.clone(),
        source,
    })?;

    let mut records = Vec::new();
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if belongs_to(crawl, line) {
            records.push(FileRecord::new(crawl.clone(), line));
        } else {
            warn!(crawl = %crawl, path = line, "Dropping path list entry from another crawl");
        }
    }
    Ok(records)
}

fn decode(bytes: &[u8]) -> io::Result<String> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut text = String::new();
        MultiGzDecoder::new(bytes).read_to_string(&mut text)?;
        Ok(text)
    } else {
        String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Fetch and merge the path lists of `crawls`. The first failing crawl aborts
/// the whole build. Returns `None` when `cancel` fires between two fetches.
pub async fn build_manifest(
    crawls: &[CrawlId],
    listings: &Listings,
    cancel: &CancellationController,
) -> Result<Option<Manifest>> {
    let mut records = Vec::new();
    for crawl in crawls {
        if cancel.is_cancelled() {
            info!(crawl = %crawl, "Manifest build interrupted");
            return Ok(None);
        }
        let bytes = listings.fetch_path_list(crawl).await?;
        let files = parse_path_list(crawl, &bytes)?;
        info!(crawl = %crawl, files = files.len(), "Loaded path list");
        records.extend(files);
    }

    let manifest = Manifest::from_records(records);
    info!(crawls = crawls.len(), files = manifest.len(), "Built manifest");
    Ok(Some(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryStore;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::Arc;

    fn crawl(id: &str) -> CrawlId {
        id.parse().unwrap()
    }

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn path(crawl: &str, name: &str) -> String {
        format!("cc-index/table/cc-main/warc/crawl={}/subset=warc/{}", crawl, name)
    }

    #[test]
    fn test_parse_filters_mislabeled_entries() {
        let text = format!(
            "{}\n\n{}\n  {}  \n",
            path("CC-MAIN-2013-20", "b.parquet"),
            path("CC-MAIN-2013-48", "x.parquet"),
            path("CC-MAIN-2013-20", "a.parquet"),
        );
        let records = parse_path_list(&crawl("CC-MAIN-2013-20"), &gzip(&text)).unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                path("CC-MAIN-2013-20", "b.parquet").as_str(),
                path("CC-MAIN-2013-20", "a.parquet").as_str(),
            ]
        );
    }

    #[test]
    fn test_parse_accepts_plain_text_and_rejects_corrupt_gzip() {
        let plain = path("CC-MAIN-2013-20", "a.parquet");
        assert_eq!(
            parse_path_list(&crawl("CC-MAIN-2013-20"), plain.as_bytes()).unwrap().len(),
            1
        );

        let mut corrupt = gzip(&plain);
        corrupt.truncate(12);
        assert!(matches!(
            parse_path_list(&crawl("CC-MAIN-2013-20"), &corrupt),
            Err(IngestError::PathListDecode { .. })
        ));
    }

    #[test]
    fn test_crawl_prefix_does_not_match_longer_ids() {
        assert!(!belongs_to(&crawl("CC-MAIN-2013"), &path("CC-MAIN-2013-20", "a.parquet")));
    }

    #[test]
    fn test_manifest_order_and_slicing() {
        let manifest = Manifest::from_records(vec![
            FileRecord::new(crawl("CC-B"), "b2"),
            FileRecord::new(crawl("CC-A"), "a1"),
            FileRecord::new(crawl("CC-B"), "b1"),
            FileRecord::new(crawl("CC-A"), "a1"),
            FileRecord::new(crawl("CC-C"), "c1"),
        ]);

        assert_eq!(manifest.len(), 4);
        assert_eq!(manifest.first(), Some(&FileRecord::new(crawl("CC-A"), "a1")));
        assert_eq!(manifest.crawl_ids(), vec![crawl("CC-A"), crawl("CC-B"), crawl("CC-C")]);

        let b: Vec<&str> = manifest
            .for_crawl(&crawl("CC-B"))
            .iter()
            .map(|r| r.path.as_str())
            .collect();
        assert_eq!(b, vec!["b1", "b2"]);
        assert!(manifest.for_crawl(&crawl("CC-Z")).is_empty());
    }

    #[test]
    fn test_bootstrap_file_is_newest_before_limit() {
        let manifest = Manifest::from_records(vec![
            FileRecord::new(crawl("CC-A"), "a1"),
            FileRecord::new(crawl("CC-B"), "b1"),
            FileRecord::new(crawl("CC-B"), "b2"),
            FileRecord::new(crawl("CC-C"), "c1"),
        ]);

        let pick = |limit: Option<&str>| {
            let limit = limit.map(crawl);
            manifest
                .bootstrap_file(limit.as_ref())
                .map(|r| r.path.clone())
        };
        assert_eq!(pick(Some("CC-C")), Some("b2".to_string()));
        assert_eq!(pick(Some("CC-B")), Some("a1".to_string()));
        assert_eq!(pick(None), Some("c1".to_string()));
        // Every crawl is at or after the limit.
        assert_eq!(pick(Some("CC-A")), Some("a1".to_string()));
        assert_eq!(Manifest::default().bootstrap_file(None), None);
    }

    #[tokio::test]
    async fn test_build_fails_fast() {
        let store = Arc::new(MemoryStore::new());
        let base = "https://data.test/";
        store.insert(
            format!("{}crawl-data/CC-MAIN-2013-20/{}", base, PATH_LIST_NAME),
            gzip(&path("CC-MAIN-2013-20", "a.parquet")),
        );
        let listings = Listings::new(store.clone(), base);

        let crawls = vec![
            crawl("CC-MAIN-2013-20"),
            crawl("CC-MAIN-2013-48"),
            crawl("CC-MAIN-2014-10"),
        ];
        match build_manifest(&crawls, &listings, &CancellationController::new()).await {
            Err(IngestError::PathListFetch { crawl: failed, .. }) => {
                assert_eq!(failed, crawl("CC-MAIN-2013-48"))
            },
            other => panic!("expected a fetch failure, got {:?}", other.map(|m| m.map(|m| m.len()))),
        }
        // Nothing after the failing crawl was requested.
        assert_eq!(store.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_build_stops_between_crawls() {
        let store = Arc::new(MemoryStore::new());
        let listings = Listings::new(store.clone(), "https://data.test/");
        let cancel = CancellationController::new();
        cancel.cancel();

        let crawls = vec![crawl("CC-MAIN-2013-20"), crawl("CC-MAIN-2013-48")];
        let manifest = build_manifest(&crawls, &listings, &cancel).await.unwrap();

        assert!(manifest.is_none());
        assert!(store.requests().is_empty());
    }
}
