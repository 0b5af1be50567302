//! Failure taxonomy of an ingestion run
//!
//! Only run-fatal failures are represented here. Per-file registration errors
//! are absorbed by the executor (retried or skipped), and an interrupt is not
//! an error at all: the run ends with an `Interrupted` report.

use ccindex_common::types::CrawlId;
use ccindex_common::CommonError;
use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::transport::TransportError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// How a fatal error ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Registry, manifest, inventory or table setup failed; nothing was changed.
    Setup,
    /// A structural schema change failed; the schema state is unsafe to build on.
    Migration,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to fetch crawl registry from {location}")]
    RegistryFetch {
        location: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to read crawl registry from {}", path.display())]
    RegistryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("crawl registry is malformed")]
    RegistryParse(#[source] serde_json::Error),

    #[error("crawl registry lists an invalid crawl id")]
    InvalidCrawlId(#[source] CommonError),

    #[error("failed to fetch path list for {crawl}")]
    PathListFetch {
        crawl: CrawlId,
        #[source]
        source: TransportError,
    },

    #[error("failed to decode path list for {crawl}")]
    PathListDecode {
        crawl: CrawlId,
        #[source]
        source: std::io::Error,
    },

    #[error("listing cache entry {} is unavailable", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("offline mode requires a listing cache")]
    OfflineWithoutCache,

    #[error("failed to set up the data transport")]
    Transport(#[source] TransportError),

    #[error("failed to open catalog at {}", path.display())]
    CatalogOpen {
        path: PathBuf,
        #[source]
        source: CatalogError,
    },

    #[error("failed to list registered files of table {table}")]
    Inventory {
        table: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to create table {table}")]
    TableSetup {
        table: String,
        #[source]
        source: CatalogError,
    },

    #[error("schema change {marker} (threshold {threshold}) failed; aborting the run")]
    Migration {
        threshold: CrawlId,
        marker: String,
        #[source]
        source: CatalogError,
    },
}

impl IngestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::Migration { .. } => FailureKind::Migration,
            _ => FailureKind::Setup,
        }
    }
}

/// Render an error with its whole `source()` chain on one line.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
