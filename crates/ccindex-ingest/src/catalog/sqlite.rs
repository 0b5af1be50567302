//! SQLite-backed catalog engine
//!
//! Stores schemas, applied change markers and the file inventory in a local
//! SQLite database. Registering a file reads its Parquet footer through the
//! data store; row data is never fetched.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::parquet_footer::read_metadata;
use super::schema::{ColumnDef, ColumnType, StructuralChange, TableSchema};
use super::{CatalogEngine, CatalogError};
use crate::transport::RemoteStore;

/// Catalog persisted in a SQLite database.
///
/// The pool holds a single connection: the catalog has one writer, and
/// transactions never wait on a second connection.
pub struct SqliteCatalog {
    pool: SqlitePool,
    data: Arc<dyn RemoteStore>,
}

impl SqliteCatalog {
    /// Open (or create) the catalog database at `path`.
    pub async fn open(path: impl AsRef<Path>, data: Arc<dyn RemoteStore>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(sqlx::Error::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Opened catalog database");
        Self::migrate(pool, data).await
    }

    /// A catalog that lives as long as this value.
    pub async fn in_memory(data: Arc<dyn RemoteStore>) -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // The database disappears with its connection, so it must never be recycled.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        Self::migrate(pool, data).await
    }

    async fn migrate(pool: SqlitePool, data: Arc<dyn RemoteStore>) -> Result<Self, CatalogError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, data })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of rows across all files registered to `table`.
    pub async fn record_count(&self, table: &str) -> Result<i64, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(record_count), 0) AS records
            FROM catalog_data_files WHERE table_name = ?1
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("records")?)
    }

    async fn load_schema(&self, table: &str) -> Result<Option<TableSchema>, CatalogError> {
        let row = sqlx::query("SELECT partition_by FROM catalog_tables WHERE name = ?1")
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let partition_by: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("partition_by")?)
            .map_err(|e| CatalogError::Corrupt(format!("partition_by of {}: {}", table, e)))?;

        let rows = sqlx::query(
            r#"
            SELECT name, column_type, nullable FROM catalog_columns
            WHERE table_name = ?1
            ORDER BY position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let columns = rows
            .iter()
            .map(|row| {
                Ok(ColumnDef {
                    name: row.try_get("name")?,
                    column_type: ColumnType::from(row.try_get::<String, _>("column_type")?),
                    nullable: row.try_get("nullable")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(TableSchema {
            columns,
            partition_by,
        }))
    }

    async fn is_registered(&self, table: &str, location: &str) -> Result<bool, CatalogError> {
        let row = sqlx::query("SELECT 1 FROM catalog_data_files WHERE table_name = ?1 AND location = ?2")
            .bind(table)
            .bind(location)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

async fn write_columns(
    conn: &mut SqliteConnection,
    table: &str,
    schema: &TableSchema,
) -> Result<(), CatalogError> {
    sqlx::query("DELETE FROM catalog_columns WHERE table_name = ?1")
        .bind(table)
        .execute(&mut *conn)
        .await?;

    for (position, column) in schema.columns.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO catalog_columns (table_name, position, name, column_type, nullable)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(table)
        .bind(position as i64)
        .bind(&column.name)
        .bind(column.column_type.to_string())
        .bind(column.nullable)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl CatalogEngine for SqliteCatalog {
    async fn table_exists(&self, table: &str) -> Result<bool, CatalogError> {
        Ok(self.load_schema(table).await?.is_some())
    }

    async fn create_table_from_file(
        &self,
        table: &str,
        location: &str,
        partition_by: &[String],
    ) -> Result<TableSchema, CatalogError> {
        if self.table_exists(table).await? {
            return Err(CatalogError::TableExists(table.to_string()));
        }

        let file = read_metadata(self.data.as_ref(), location).await?;
        let schema = TableSchema::from_file(file.columns, partition_by);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO catalog_tables (name, partition_by, source_location, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(table)
        .bind(serde_json::to_string(&schema.partition_by)?)
        .bind(location)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        write_columns(&mut tx, table, &schema).await?;
        tx.commit().await?;

        info!(
            table,
            source = location,
            columns = schema.columns.len(),
            "Created table"
        );
        Ok(schema)
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema, CatalogError> {
        self.load_schema(table)
            .await?
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))
    }

    async fn list_files(&self, table: &str) -> Result<HashSet<String>, CatalogError> {
        let rows = sqlx::query("SELECT location FROM catalog_data_files WHERE table_name = ?1")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("location").map_err(CatalogError::from))
            .collect()
    }

    async fn register_file(
        &self,
        table: &str,
        location: &str,
        allow_missing: bool,
    ) -> Result<(), CatalogError> {
        let schema = self.table_schema(table).await?;
        if self.is_registered(table, location).await? {
            debug!(table, location, "File already registered");
            return Ok(());
        }

        let file = read_metadata(self.data.as_ref(), location).await?;
        schema.check_file(table, location, &file.columns, allow_missing)?;
        let partitions = schema.partition_values(table, location)?;

        sqlx::query(
            r#"
            INSERT INTO catalog_data_files
                (table_name, location, partition_values, record_count, row_group_count, registered_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(table_name, location) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(location)
        .bind(serde_json::to_string(&partitions)?)
        .bind(file.num_rows)
        .bind(file.num_row_groups as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(table, location, rows = file.num_rows, "Registered file");
        Ok(())
    }

    async fn applied_changes(&self, table: &str) -> Result<HashSet<String>, CatalogError> {
        let rows = sqlx::query("SELECT marker FROM catalog_schema_changes WHERE table_name = ?1")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("marker").map_err(CatalogError::from))
            .collect()
    }

    async fn apply_change(
        &self,
        table: &str,
        marker: &str,
        change: &StructuralChange,
    ) -> Result<(), CatalogError> {
        let mut schema = self.table_schema(table).await?;
        if self.applied_changes(table).await?.contains(marker) {
            debug!(table, marker, "Structural change already applied");
            return Ok(());
        }

        let changed = schema.apply(table, change)?;

        let mut tx = self.pool.begin().await?;

        if changed {
            write_columns(&mut tx, table, &schema).await?;
            sqlx::query("UPDATE catalog_tables SET partition_by = ?2 WHERE name = ?1")
                .bind(table)
                .bind(serde_json::to_string(&schema.partition_by)?)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO catalog_schema_changes (table_name, marker, change, applied_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(table)
        .bind(marker)
        .bind(serde_json::to_string(change)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(table, marker, %change, changed, "Applied structural change");
        Ok(())
    }
}
