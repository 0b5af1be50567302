//! Structural schema migrations
//!
//! The columnar index gained columns and changed its timestamp semantics over
//! the years. Each change is tied to the first crawl that needs it and must
//! land before any file of that crawl (or a later one) is registered.

use ccindex_common::types::CrawlId;
use std::collections::HashSet;
use tracing::info;

use crate::catalog::{CatalogEngine, ColumnDef, ColumnType, StructuralChange};
use crate::error::{IngestError, Result};
use crate::pipeline::RunContext;

/// A one-time structural change keyed to the crawl that introduces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMigration {
    pub threshold: CrawlId,
    /// Stable name recorded by the catalog once applied
    pub marker: String,
    pub change: StructuralChange,
}

impl SchemaMigration {
    pub fn new(threshold: CrawlId, marker: impl Into<String>, change: StructuralChange) -> Self {
        Self {
            threshold,
            marker: marker.into(),
            change,
        }
    }
}

fn crawl(id: &'static str) -> CrawlId {
    CrawlId::try_from(id.to_string()).unwrap_or_else(|_| unreachable!("{id} is a valid crawl id"))
}

/// Schema changes of the Common Crawl columnar index, in crawl order.
pub fn canonical_migrations() -> Vec<SchemaMigration> {
    vec![
        SchemaMigration::new(
            crawl("CC-MAIN-2018-34"),
            "cc-main-2018-34/add-content-charset-languages",
            StructuralChange::AddColumns {
                columns: vec![
                    ColumnDef::new("content_charset", ColumnType::Varchar),
                    ColumnDef::new("content_languages", ColumnType::Varchar),
                ],
            },
        ),
        SchemaMigration::new(
            crawl("CC-MAIN-2019-47"),
            "cc-main-2019-47/add-fetch-redirect",
            StructuralChange::AddColumns {
                columns: vec![ColumnDef::new("fetch_redirect", ColumnType::Varchar)],
            },
        ),
        SchemaMigration::new(
            crawl("CC-MAIN-2021-49"),
            "cc-main-2021-49/fetch-time-tz",
            StructuralChange::WidenColumnType {
                column: "fetch_time".to_string(),
                to: ColumnType::TimestampTz,
            },
        ),
    ]
}

/// Applies migrations exactly once, when the pipeline enters a crawl.
#[derive(Debug)]
pub struct MigrationSequencer {
    migrations: Vec<SchemaMigration>,
    applied: HashSet<String>,
}

impl MigrationSequencer {
    pub fn new(mut migrations: Vec<SchemaMigration>, applied: HashSet<String>) -> Self {
        migrations.sort_by(|a, b| a.threshold.cmp(&b.threshold));
        Self { migrations, applied }
    }

    /// Build a sequencer from the markers `table` already carries.
    pub async fn load(
        migrations: Vec<SchemaMigration>,
        catalog: &dyn CatalogEngine,
        table: &str,
    ) -> Result<Self> {
        let applied = catalog
            .applied_changes(table)
            .await
            .map_err(|source| IngestError::Inventory {
                table: table.to_string(),
                source,
            })?;
        Ok(Self::new(migrations, applied))
    }

    pub fn is_applied(&self, marker: &str) -> bool {
        self.applied.contains(marker)
    }

    /// Unapplied migrations whose threshold is at or before `crawl`, in
    /// table order.
    pub fn due(&self, crawl: &CrawlId) -> Vec<&SchemaMigration> {
        self.migrations
            .iter()
            .filter(|m| m.threshold <= *crawl && !self.is_applied(&m.marker))
            .collect()
    }

    /// Apply every migration due for the context's current crawl before the
    /// crawl's first file is handed out. Re-entering a crawl finds nothing
    /// due. Returns the markers applied.
    pub async fn on_enter(&mut self, ctx: &RunContext, catalog: &dyn CatalogEngine) -> Result<Vec<String>> {
        let Some(crawl) = ctx.current_crawl() else {
            return Ok(Vec::new());
        };
        let table = ctx.table.as_str();

        let due: Vec<SchemaMigration> = self.due(crawl).into_iter().cloned().collect();
        let mut applied = Vec::with_capacity(due.len());

        for migration in due {
            if migration.threshold < *crawl {
                info!(
                    crawl = %crawl,
                    threshold = %migration.threshold,
                    marker = %migration.marker,
                    "Applying overdue schema change"
                );
            } else {
                info!(crawl = %crawl, marker = %migration.marker, change = %migration.change, "Applying schema change");
            }

            catalog
                .apply_change(table, &migration.marker, &migration.change)
                .await
                .map_err(|source| IngestError::Migration {
                    threshold: migration.threshold.clone(),
                    marker: migration.marker.clone(),
                    source,
                })?;

            self.applied.insert(migration.marker.clone());
            applied.push(migration.marker);
        }

        Ok(applied)
    }
}
