//! Ingestion pipeline
//!
//! Registry → manifest → table bootstrap → for each crawl, ascending:
//! migrations, diff, registration. Everything runs sequentially; the catalog
//! is the only durable record of progress.

use ccindex_common::types::CrawlId;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::ListingCache;
use crate::cancel::CancellationController;
use crate::catalog::{CatalogEngine, StructuralChange};
use crate::config::IngestConfig;
use crate::differ::{diff_all, diff_crawl, PendingQueue, RegisteredSet};
use crate::error::{IngestError, Result};
use crate::executor::{IngestionExecutor, Interrupted, RetryPolicy};
use crate::listing::Listings;
use crate::manifest::{build_manifest, Manifest};
use crate::migration::{canonical_migrations, MigrationSequencer, SchemaMigration};
use crate::registry::{load_registry, supported_crawls, RegistrySource};
use crate::report::{CrawlSummary, RunReport, RunStatus};
use crate::transport::{DataLocator, Transport};

/// Partitioning of a freshly created table.
pub const PARTITION_COLUMNS: [&str; 2] = ["crawl", "subset"];

/// Progress is logged for the first file of a crawl and every Nth after.
const LOG_EVERY: usize = 10;

/// State carried through one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub table: String,
    pub cancel: CancellationController,
    current_crawl: Option<CrawlId>,
}

impl RunContext {
    pub fn new(table: impl Into<String>, cancel: CancellationController) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            table: table.into(),
            cancel,
            current_crawl: None,
        }
    }

    pub fn enter_crawl(&mut self, crawl: CrawlId) {
        self.current_crawl = Some(crawl);
    }

    pub fn current_crawl(&self) -> Option<&CrawlId> {
        self.current_crawl.as_ref()
    }
}

pub struct Pipeline {
    catalog: Arc<dyn CatalogEngine>,
    listings: Listings,
    locator: DataLocator,
    registry: RegistrySource,
    table: String,
    partition_by: Vec<String>,
    migrations: Vec<SchemaMigration>,
    retry: RetryPolicy,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<dyn CatalogEngine>,
        listings: Listings,
        locator: DataLocator,
        registry: RegistrySource,
        table: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            listings,
            locator,
            registry,
            table: table.into(),
            partition_by: PARTITION_COLUMNS.iter().map(|c| c.to_string()).collect(),
            migrations: canonical_migrations(),
            retry: RetryPolicy::default(),
            show_progress: false,
        }
    }

    /// Wire a pipeline from validated configuration.
    pub fn from_config(
        config: &IngestConfig,
        catalog: Arc<dyn CatalogEngine>,
        transport: &Transport,
        working_dir: &Path,
    ) -> Self {
        let listings = Listings::new(transport.listings.clone(), config.listing_base.clone())
            .with_cache(ListingCache::new(&config.cache_dir))
            .offline(config.offline);
        let registry = RegistrySource::resolve(config.registry.as_deref(), working_dir);

        Self::new(
            catalog,
            listings,
            transport.locator.clone(),
            registry,
            config.table.clone(),
        )
        .with_retry_policy(RetryPolicy::new(config.cooldown))
        .with_progress(config.show_progress)
    }

    pub fn with_migrations(mut self, migrations: Vec<SchemaMigration>) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Load the registry and build the manifest of all supported crawls.
    /// Returns `None` when `cancel` fires before the manifest is complete.
    pub async fn discover(&self, cancel: &CancellationController) -> Result<Option<Manifest>> {
        let periods = load_registry(&self.registry, &self.listings).await?;
        let crawls = supported_crawls(&periods);
        build_manifest(&crawls, &self.listings, cancel).await
    }

    /// Pending work per crawl, without touching the catalog.
    pub async fn plan(&self, cancel: &CancellationController) -> Result<Option<Vec<PendingQueue>>> {
        let Some(manifest) = self.discover(cancel).await? else {
            return Ok(None);
        };
        let registered = self.registered().await?;
        Ok(Some(diff_all(&manifest, &registered)))
    }

    async fn registered(&self) -> Result<RegisteredSet> {
        let locations = self
            .catalog
            .list_files(&self.table)
            .await
            .map_err(|source| IngestError::Inventory {
                table: self.table.clone(),
                source,
            })?;
        Ok(RegisteredSet::from_locations(locations, &self.locator))
    }

    /// Run the pipeline to completion or until `cancel` fires.
    ///
    /// An interrupted run is not an error: the report says `Interrupted` and
    /// the next run picks up from the catalog inventory.
    pub async fn run(&self, cancel: CancellationController) -> Result<RunReport> {
        let mut ctx = RunContext::new(self.table.clone(), cancel);
        let mut report = RunReport::new(ctx.run_id, &self.table);
        info!(run_id = %ctx.run_id, table = %self.table, "Starting ingestion run");

        let manifest = match self.discover(&ctx.cancel).await? {
            Some(manifest) if !ctx.cancel.is_cancelled() => manifest,
            _ => return Ok(report.finish(RunStatus::Interrupted)),
        };
        if manifest.is_empty() {
            warn!("Manifest is empty, nothing to ingest");
            return Ok(report.finish(RunStatus::Completed));
        }

        self.ensure_table(&manifest).await?;

        // Single writer: the inventory cannot change under us during the run.
        let registered = self.registered().await?;
        info!(registered = registered.len(), manifest = manifest.len(), "Loaded catalog inventory");

        let mut sequencer =
            MigrationSequencer::load(self.migrations.clone(), self.catalog.as_ref(), &self.table).await?;
        let executor = IngestionExecutor::new(self.catalog.clone(), self.locator.clone(), self.retry.clone());

        for crawl in manifest.crawl_ids() {
            if ctx.cancel.is_cancelled() {
                return Ok(report.finish(RunStatus::Interrupted));
            }

            let queue = diff_crawl(&manifest, &crawl, &registered);
            let mut summary = CrawlSummary::new(&queue);

            if queue.is_complete() {
                info!(crawl = %crawl, files = queue.total, "Crawl complete, skipping");
                report.crawls.push(summary);
                continue;
            }

            ctx.enter_crawl(crawl.clone());
            let applied = sequencer.on_enter(&ctx, self.catalog.as_ref()).await?;
            report.applied_migrations.extend(applied);

            let outcome = self.ingest_queue(&ctx, &executor, &queue, &mut summary).await;
            report.crawls.push(summary);

            if outcome.is_err() {
                info!(crawl = %crawl, "Run interrupted, stopping cleanly");
                return Ok(report.finish(RunStatus::Interrupted));
            }
        }

        Ok(report.finish(RunStatus::Completed))
    }

    /// Crawls from here on may carry column types a new table must not start
    /// with; their own migration widens the table when they are reached.
    fn bootstrap_limit(&self) -> Option<&CrawlId> {
        self.migrations
            .iter()
            .filter(|m| matches!(m.change, StructuralChange::WidenColumnType { .. }))
            .map(|m| &m.threshold)
            .min()
    }

    /// Create the target table if it is missing, from the newest manifest
    /// file ahead of the first type change. Columns later crawls add without
    /// a migration then already exist.
    async fn ensure_table(&self, manifest: &Manifest) -> Result<()> {
        let setup_error = |source| IngestError::TableSetup {
            table: self.table.clone(),
            source,
        };

        if self.catalog.table_exists(&self.table).await.map_err(setup_error)? {
            return Ok(());
        }

        let Some(source) = manifest.bootstrap_file(self.bootstrap_limit()) else {
            return Ok(());
        };
        let location = self.locator.locate(source);
        info!(table = %self.table, source = %location, "Creating table");

        self.catalog
            .create_table_from_file(&self.table, &location, &self.partition_by)
            .await
            .map_err(setup_error)?;
        Ok(())
    }

    #[instrument(skip_all, fields(crawl = %queue.crawl_id))]
    async fn ingest_queue(
        &self,
        ctx: &RunContext,
        executor: &IngestionExecutor,
        queue: &PendingQueue,
        summary: &mut CrawlSummary,
    ) -> std::result::Result<(), Interrupted> {
        info!(
            pending = queue.files.len(),
            already_registered = queue.already_registered(),
            "Ingesting crawl"
        );
        let progress = self.progress_bar(queue);

        for (index, file) in queue.files.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                progress.abandon();
                return Err(Interrupted);
            }

            let position = index + 1;
            if position == 1 || position % LOG_EVERY == 0 {
                info!(file = %file.path, position, pending = queue.files.len(), "Registering file");
            }

            match executor.ingest(ctx, file).await {
                Ok(outcome) => summary.record(file, outcome),
                Err(Interrupted) => {
                    progress.abandon();
                    return Err(Interrupted);
                },
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        info!(
            registered = summary.registered,
            retried = summary.retried,
            skipped = summary.skipped.len(),
            "Crawl done"
        );
        Ok(())
    }

    fn progress_bar(&self, queue: &PendingQueue) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(queue.files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("Registering {}", queue.crawl_id));
        pb
    }
}
