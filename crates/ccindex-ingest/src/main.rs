//! ccindex Ingest - Common Crawl columnar index catalog builder

use anyhow::{Context, Result};
use ccindex_common::logging::{init_logging, LogConfig, LogLevel};
use ccindex_ingest::cancel::CancellationController;
use ccindex_ingest::catalog::SqliteCatalog;
use ccindex_ingest::config::{
    IngestConfig, TransportMode, DEFAULT_CACHE_DIR, DEFAULT_CATALOG_PATH, DEFAULT_COOLDOWN_SECS,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_LISTING_BASE, DEFAULT_S3_REGION, DEFAULT_TABLE,
};
use ccindex_ingest::differ::PendingQueue;
use ccindex_ingest::error::error_chain;
use ccindex_ingest::pipeline::Pipeline;
use ccindex_ingest::transport::Transport;
use ccindex_ingest::{IngestError, RunStatus};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ccindex-ingest")]
#[command(author, version, about = "Register the Common Crawl columnar index with a local catalog")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Register every pending file (default)
    Run,
    /// Show pending files per crawl without changing the catalog
    Plan,
}

#[derive(Args, Debug)]
struct Options {
    /// Data transport: auto picks S3 when AWS credentials are set
    #[arg(long, value_enum, env = "CCINDEX_TRANSPORT", default_value = "auto", global = true)]
    transport: TransportMode,

    /// SQLite catalog file
    #[arg(long, env = "CCINDEX_CATALOG", default_value = DEFAULT_CATALOG_PATH, global = true)]
    catalog: PathBuf,

    /// Target table
    #[arg(long, env = "CCINDEX_TABLE", default_value = DEFAULT_TABLE, global = true)]
    table: String,

    /// Registry path or URL (default: ./collinfo.json if present, else the published registry)
    #[arg(long, env = "CCINDEX_REGISTRY", global = true)]
    registry: Option<String>,

    /// Base URL of the per-crawl path lists
    #[arg(long, env = "CCINDEX_LISTING_BASE", default_value = DEFAULT_LISTING_BASE, global = true)]
    listing_base: String,

    /// Listing cache directory
    #[arg(long, env = "CCINDEX_CACHE_DIR", default_value = DEFAULT_CACHE_DIR, global = true)]
    cache_dir: PathBuf,

    /// Read the registry and path lists from the cache only
    #[arg(long, env = "CCINDEX_OFFLINE", global = true)]
    offline: bool,

    /// Seconds to wait after a throttling response
    #[arg(long, env = "CCINDEX_COOLDOWN_SECS", default_value_t = DEFAULT_COOLDOWN_SECS, global = true)]
    cooldown_secs: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "CCINDEX_HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS, global = true)]
    http_timeout_secs: u64,

    /// AWS region for S3 access
    #[arg(long, env = "CCINDEX_S3_REGION", default_value = DEFAULT_S3_REGION, global = true)]
    s3_region: String,

    /// Write the run report as JSON to this file
    #[arg(long, env = "CCINDEX_REPORT", global = true)]
    report: Option<PathBuf>,

    /// Disable the progress bar
    #[arg(long, env = "CCINDEX_NO_PROGRESS", global = true)]
    no_progress: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Options {
    fn into_config(self) -> IngestConfig {
        IngestConfig {
            transport: self.transport,
            catalog_path: self.catalog,
            table: self.table,
            registry: self.registry,
            listing_base: self.listing_base,
            cache_dir: self.cache_dir,
            offline: self.offline,
            cooldown: Duration::from_secs(self.cooldown_secs),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            s3_region: self.s3_region,
            report_path: self.report,
            show_progress: !self.no_progress,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let log_config = logging_config(cli.options.verbose)?;
    let _guard = init_logging(&log_config)?;

    let config = cli.options.into_config();
    config.validate().context("Invalid configuration")?;

    match execute(command, &config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(kind = ?e.kind(), error = %error_chain(&e), "Run failed");
            Err(e.into())
        },
    }
}

fn logging_config(verbose: bool) -> Result<LogConfig> {
    let log_level = if verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ccindex-ingest".to_string())
        .build();

    // Environment variables take precedence
    LogConfig::from_env_with(log_config).context("Invalid logging configuration")
}

async fn execute(command: Command, config: &IngestConfig) -> std::result::Result<(), IngestError> {
    let cancel = CancellationController::new();
    let signals = cancel.install_signal_handlers();

    let resolved = config.transport.resolve(|key| std::env::var(key).ok());
    let transport = Transport::connect(&resolved, &config.s3_region, config.http_timeout)
        .await
        .map_err(IngestError::Transport)?;

    let catalog = SqliteCatalog::open(&config.catalog_path, transport.data.clone())
        .await
        .map_err(|source| IngestError::CatalogOpen {
            path: config.catalog_path.clone(),
            source,
        })?;

    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let pipeline = Pipeline::from_config(config, Arc::new(catalog), &transport, &working_dir);

    match command {
        Command::Plan => match pipeline.plan(&cancel).await? {
            Some(queues) => print_plan(&queues),
            None => info!("Plan interrupted"),
        },
        Command::Run => {
            let report = pipeline.run(cancel.clone()).await?;
            report.log_summary();
            if let Some(path) = &config.report_path {
                if let Err(e) = report.write_json(path) {
                    error!(path = %path.display(), error = %e, "Failed to write run report");
                }
            }
            if report.status == RunStatus::Interrupted {
                info!("Stopped cleanly; the next run resumes from the catalog");
            }
        },
    }

    signals.abort();
    Ok(())
}

fn print_plan(queues: &[PendingQueue]) {
    println!("{:<20} {:>10} {:>12} {:>10}", "CRAWL", "FILES", "REGISTERED", "PENDING");
    for queue in queues {
        println!(
            "{:<20} {:>10} {:>12} {:>10}",
            queue.crawl_id.as_str(),
            queue.total,
            queue.already_registered(),
            queue.files.len()
        );
    }
    let pending: usize = queues.iter().map(|q| q.files.len()).sum();
    println!("{} crawls, {} files pending", queues.len(), pending);
}
