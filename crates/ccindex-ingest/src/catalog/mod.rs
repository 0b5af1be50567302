//! Catalog engines
//!
//! A catalog records, per logical table, its schema, its partitioning, the
//! structural changes applied to it and the inventory of remote files backing
//! it. Row data never enters the catalog.
//!
//! # Engines
//!
//! - [`sqlite::SqliteCatalog`]: persisted in SQLite, reads Parquet footers
//!   through a [`RemoteStore`](crate::transport::RemoteStore)
//! - [`memory::InMemoryCatalog`]: held in memory with scripted failures

pub mod memory;
pub mod parquet_footer;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use crate::transport::TransportError;

pub use memory::{Event, Fault, InMemoryCatalog};
pub use schema::{ColumnDef, ColumnType, StructuralChange, TableSchema};
pub use sqlite::SqliteCatalog;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{location} is not a readable parquet file: {message}")]
    InvalidParquet { location: String, message: String },

    #[error("{location} does not fit table {table}: {reason}")]
    SchemaMismatch {
        table: String,
        location: String,
        reason: String,
    },

    #[error("table {0} does not exist")]
    TableNotFound(String),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("column {column} does not exist in table {table}")]
    ColumnNotFound { table: String, column: String },

    #[error("cannot change column {column} from {from} to {to}")]
    IncompatibleChange {
        column: String,
        from: ColumnType,
        to: ColumnType,
    },

    #[error("catalog database error")]
    Database(#[from] sqlx::Error),

    #[error("catalog database migration failed")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("catalog serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("catalog state is corrupt: {0}")]
    Corrupt(String),

    #[error("injected failure: {0}")]
    Injected(String),
}

impl CatalogError {
    /// Whether the error is an upstream throttling response.
    pub fn is_throttled(&self) -> bool {
        matches!(self, CatalogError::Transport(err) if err.is_throttled())
    }
}

/// Operations the pipeline consumes from a catalog engine.
///
/// Engines are single-writer: callers never issue two mutating calls
/// concurrently against the same table.
#[async_trait]
pub trait CatalogEngine: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool, CatalogError>;

    /// Create `table` with the schema embedded in the file at `location`.
    async fn create_table_from_file(
        &self,
        table: &str,
        location: &str,
        partition_by: &[String],
    ) -> Result<TableSchema, CatalogError>;

    async fn table_schema(&self, table: &str) -> Result<TableSchema, CatalogError>;

    /// Locations of every file registered to `table`. Empty when the table
    /// does not exist.
    async fn list_files(&self, table: &str) -> Result<HashSet<String>, CatalogError>;

    /// Register the remote file at `location` as backing data of `table`.
    ///
    /// Metadata only. With `allow_missing`, files lacking some table columns
    /// are accepted. Registering an already registered location is a no-op.
    async fn register_file(
        &self,
        table: &str,
        location: &str,
        allow_missing: bool,
    ) -> Result<(), CatalogError>;

    /// Markers of structural changes applied to `table`.
    async fn applied_changes(&self, table: &str) -> Result<HashSet<String>, CatalogError>;

    /// Apply `change` and record `marker` in one step.
    async fn apply_change(
        &self,
        table: &str,
        marker: &str,
        change: &StructuralChange,
    ) -> Result<(), CatalogError>;
}
