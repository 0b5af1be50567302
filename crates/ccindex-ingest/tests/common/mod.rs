//! Shared fixtures for ccindex-ingest integration tests
//!
//! A [`Fixture`] serves a crawl registry, per-crawl path lists and Parquet
//! data files from a [`MemoryStore`], and wires a [`Pipeline`] against it.
//! No network access is needed.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::Fixture;
//!
//! #[tokio::test]
//! async fn test_with_fixture() {
//!     let mut fixture = Fixture::new();
//!     let paths = fixture.add_crawl("CC-MAIN-2016-07", 2);
//!     let catalog = std::sync::Arc::new(ccindex_ingest::catalog::InMemoryCatalog::new());
//!     let cancel = ccindex_ingest::cancel::CancellationController::new();
//!     let report = fixture.pipeline(catalog).run(cancel).await.unwrap();
//!     assert_eq!(report.registered(), paths.len());
//! }
//! ```

#![allow(dead_code)]

use ccindex_ingest::cancel::CancellationController;
use ccindex_ingest::catalog::CatalogEngine;
use ccindex_ingest::config::PUBLIC_DATA_BASE;
use ccindex_ingest::differ::PendingQueue;
use ccindex_ingest::executor::RetryPolicy;
use ccindex_ingest::listing::Listings;
use ccindex_ingest::manifest::Manifest;
use ccindex_ingest::pipeline::Pipeline;
use ccindex_ingest::registry::RegistrySource;
use ccindex_ingest::transport::{DataLocator, MemoryStore};
use flate2::write::GzEncoder;
use flate2::Compression;
use parquet::column::writer::ColumnWriter;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

pub const TABLE: &str = "archives";
pub const REGISTRY_URL: &str = "https://index.test/collinfo.json";
pub const LISTING_BASE: &str = "https://listings.test/";
pub const COOLDOWN: Duration = Duration::from_secs(60);

/// Index layout before CC-MAIN-2018-34.
pub const SCHEMA_2013: &str = "message spark_schema {
    OPTIONAL BYTE_ARRAY url_surtkey (UTF8);
    OPTIONAL BYTE_ARRAY url (UTF8);
    OPTIONAL INT64 fetch_time (TIMESTAMP(MICROS, false));
    OPTIONAL INT32 fetch_status;
    OPTIONAL BYTE_ARRAY warc_filename (UTF8);
}";

/// CC-MAIN-2018-34 adds charset and language detection.
pub const SCHEMA_2018: &str = "message spark_schema {
    OPTIONAL BYTE_ARRAY url_surtkey (UTF8);
    OPTIONAL BYTE_ARRAY url (UTF8);
    OPTIONAL INT64 fetch_time (TIMESTAMP(MICROS, false));
    OPTIONAL INT32 fetch_status;
    OPTIONAL BYTE_ARRAY warc_filename (UTF8);
    OPTIONAL BYTE_ARRAY content_charset (UTF8);
    OPTIONAL BYTE_ARRAY content_languages (UTF8);
}";

/// Layout between CC-MAIN-2019-47 and the timezone change. Carries
/// `content_truncated`, which no schema migration adds.
pub const SCHEMA_2020: &str = "message spark_schema {
    OPTIONAL BYTE_ARRAY url_surtkey (UTF8);
    OPTIONAL BYTE_ARRAY url (UTF8);
    OPTIONAL INT64 fetch_time (TIMESTAMP(MICROS, false));
    OPTIONAL INT32 fetch_status;
    OPTIONAL BYTE_ARRAY fetch_redirect (UTF8);
    OPTIONAL BYTE_ARRAY warc_filename (UTF8);
    OPTIONAL BYTE_ARRAY content_charset (UTF8);
    OPTIONAL BYTE_ARRAY content_languages (UTF8);
    OPTIONAL BYTE_ARRAY content_truncated (UTF8);
}";

/// From CC-MAIN-2021-49 on `fetch_time` is UTC-adjusted.
pub const SCHEMA_2022: &str = "message spark_schema {
    OPTIONAL BYTE_ARRAY url_surtkey (UTF8);
    OPTIONAL BYTE_ARRAY url (UTF8);
    OPTIONAL INT64 fetch_time (TIMESTAMP(MICROS, true));
    OPTIONAL INT32 fetch_status;
    OPTIONAL BYTE_ARRAY fetch_redirect (UTF8);
    OPTIONAL BYTE_ARRAY warc_filename (UTF8);
    OPTIONAL BYTE_ARRAY content_charset (UTF8);
    OPTIONAL BYTE_ARRAY content_languages (UTF8);
}";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ccindex_ingest=debug")
        .with_test_writer()
        .try_init();
}

/// Pending queues of a pipeline that is never interrupted.
pub async fn plan(pipeline: &Pipeline) -> Vec<PendingQueue> {
    pipeline
        .plan(&CancellationController::new())
        .await
        .unwrap()
        .expect("plan was not interrupted")
}

pub async fn discover(pipeline: &Pipeline) -> Manifest {
    pipeline
        .discover(&CancellationController::new())
        .await
        .unwrap()
        .expect("discovery was not interrupted")
}

pub fn partitions() -> Vec<String> {
    vec!["crawl".to_string(), "subset".to_string()]
}

/// Relative path of the `index`th data file of `crawl`.
pub fn data_path(crawl: &str, index: usize) -> String {
    format!(
        "cc-index/table/cc-main/warc/crawl={}/subset=warc/part-{:05}.parquet",
        crawl, index
    )
}

/// Location of a relative path under the public data base.
pub fn location(path: &str) -> String {
    format!("{}{}", PUBLIC_DATA_BASE, path)
}

pub fn gzip_lines(lines: &[String]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        writeln!(encoder, "{}", line).unwrap();
    }
    encoder.finish().unwrap()
}

/// A Parquet file with `rows` all-null rows. Every column must be OPTIONAL.
pub fn parquet_file(message_type: &str, rows: usize) -> Vec<u8> {
    let schema = Arc::new(parse_message_type(message_type).unwrap());
    let props = Arc::new(WriterProperties::builder().build());
    let mut buffer = Vec::new();
    let mut writer = SerializedFileWriter::new(&mut buffer, schema, props).unwrap();

    if rows > 0 {
        let nulls = vec![0i16; rows];
        let mut row_group = writer.next_row_group().unwrap();
        while let Some(mut column) = row_group.next_column().unwrap() {
            match column.untyped() {
                ColumnWriter::BoolColumnWriter(w) => w.write_batch(&[], Some(&nulls), None),
                ColumnWriter::Int32ColumnWriter(w) => w.write_batch(&[], Some(&nulls), None),
                ColumnWriter::Int64ColumnWriter(w) => w.write_batch(&[], Some(&nulls), None),
                ColumnWriter::Int96ColumnWriter(w) => w.write_batch(&[], Some(&nulls), None),
                ColumnWriter::FloatColumnWriter(w) => w.write_batch(&[], Some(&nulls), None),
                ColumnWriter::DoubleColumnWriter(w) => w.write_batch(&[], Some(&nulls), None),
                ColumnWriter::ByteArrayColumnWriter(w) => w.write_batch(&[], Some(&nulls), None),
                ColumnWriter::FixedLenByteArrayColumnWriter(w) => {
                    w.write_batch(&[], Some(&nulls), None)
                },
            }
            .unwrap();
            column.close().unwrap();
        }
        row_group.close().unwrap();
    }

    writer.close().unwrap();
    buffer
}

/// Registry, path lists and data files served from memory.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    registry: Vec<String>,
    crawls: BTreeMap<String, Vec<String>>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        let fixture = Self {
            store: Arc::new(MemoryStore::new()),
            registry: Vec::new(),
            crawls: BTreeMap::new(),
        };
        fixture.publish_registry();
        fixture
    }

    /// Publish `crawl` with `files` data files and return their relative paths.
    pub fn add_crawl(&mut self, crawl: &str, files: usize) -> Vec<String> {
        let paths: Vec<String> = (0..files).map(|i| data_path(crawl, i)).collect();
        self.set_path_list(crawl, &paths);
        self.crawls.insert(crawl.to_string(), paths.clone());
        self.registry.push(crawl.to_string());
        self.publish_registry();
        paths
    }

    /// List a crawl in the registry without publishing a path list.
    pub fn add_registry_entry(&mut self, crawl: &str) {
        self.registry.push(crawl.to_string());
        self.publish_registry();
    }

    /// Overwrite the raw path list of `crawl`.
    pub fn set_path_list(&self, crawl: &str, lines: &[String]) {
        self.store.insert(
            format!("{}crawl-data/{}/cc-index-table.paths.gz", LISTING_BASE, crawl),
            gzip_lines(lines),
        );
    }

    /// Serve `bytes` as the data file at relative `path`.
    pub fn put_data(&self, path: &str, bytes: Vec<u8>) {
        self.store.insert(location(path), bytes);
    }

    pub fn paths(&self, crawl: &str) -> Vec<String> {
        self.crawls.get(crawl).cloned().unwrap_or_default()
    }

    pub fn locations(&self, crawl: &str) -> Vec<String> {
        self.paths(crawl).iter().map(|p| location(p)).collect()
    }

    pub fn listings(&self) -> Listings {
        Listings::new(self.store.clone(), LISTING_BASE)
    }

    pub fn pipeline(&self, catalog: Arc<dyn CatalogEngine>) -> Pipeline {
        self.pipeline_with(catalog, self.listings())
    }

    pub fn pipeline_with(&self, catalog: Arc<dyn CatalogEngine>, listings: Listings) -> Pipeline {
        Pipeline::new(
            catalog,
            listings,
            DataLocator::new(PUBLIC_DATA_BASE),
            RegistrySource::Remote(REGISTRY_URL.to_string()),
            TABLE,
        )
        .with_retry_policy(RetryPolicy::new(COOLDOWN))
    }

    fn publish_registry(&self) {
        let entries: Vec<serde_json::Value> = self
            .registry
            .iter()
            .map(|id| serde_json::json!({ "id": id, "name": format!("{} Index", id) }))
            .collect();
        self.store
            .insert(REGISTRY_URL, serde_json::to_vec(&entries).unwrap());
    }
}
