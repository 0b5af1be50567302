//! ccindex Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the ccindex workspace.
//!
//! # Overview
//!
//! - **Types**: crawl identifiers and the remote file records that make up a manifest
//! - **Error Handling**: the common error type and result alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use ccindex_common::types::{CrawlId, FileRecord};
//!
//! fn main() -> ccindex_common::Result<()> {
//!     let crawl: CrawlId = "CC-MAIN-2024-10".parse()?;
//!     let record = FileRecord::new(
//!         crawl,
//!         "cc-index/table/cc-main/warc/crawl=CC-MAIN-2024-10/subset=warc/part-00000.parquet",
//!     );
//!     assert_eq!(record.partition_value("subset"), Some("warc"));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
