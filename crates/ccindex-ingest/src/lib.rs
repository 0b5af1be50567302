//! ccindex Ingest Library
//!
//! Registers the Parquet files of the Common Crawl columnar index with a
//! metadata catalog, one logical table spanning every crawl.
//!
//! # Pipeline
//!
//! - **Registry**: the ordered list of crawls (`collinfo.json`)
//! - **Manifest**: every data file of every supported crawl
//! - **Differ**: manifest minus catalog inventory, per crawl
//! - **Migrations**: structural schema changes applied once, at their crawl
//! - **Executor**: metadata-only registration with throttling retries
//!
//! Runs are idempotent and resumable: progress lives only in the catalog.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ccindex_ingest::cancel::CancellationController;
//! use ccindex_ingest::catalog::SqliteCatalog;
//! use ccindex_ingest::config::{IngestConfig, ResolvedTransport};
//! use ccindex_ingest::pipeline::Pipeline;
//! use ccindex_ingest::transport::Transport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::default();
//!     let transport = Transport::connect(&ResolvedTransport::Public, &config.s3_region, config.http_timeout).await?;
//!     let catalog = Arc::new(SqliteCatalog::open(&config.catalog_path, transport.data.clone()).await?);
//!
//!     let pipeline = Pipeline::from_config(&config, catalog, &transport, &std::env::current_dir()?);
//!     let report = pipeline.run(CancellationController::new()).await?;
//!     report.log_summary();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod differ;
pub mod error;
pub mod executor;
pub mod listing;
pub mod manifest;
pub mod migration;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod transport;

pub use error::{IngestError, Result};
pub use pipeline::{Pipeline, RunContext};
pub use report::{RunReport, RunStatus};
