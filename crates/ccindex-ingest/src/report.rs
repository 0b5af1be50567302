//! Run reports

use ccindex_common::types::{CrawlId, FileRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::differ::PendingQueue;
use crate::executor::IngestionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub error: String,
}

/// What happened to one crawl during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub crawl_id: CrawlId,
    pub manifest_files: usize,
    pub already_registered: usize,
    pub registered: usize,
    /// Files that needed at least one retry
    pub retried: usize,
    pub retries: u64,
    pub skipped: Vec<SkippedFile>,
}

impl CrawlSummary {
    pub fn new(queue: &PendingQueue) -> Self {
        Self {
            crawl_id: queue.crawl_id.clone(),
            manifest_files: queue.total,
            already_registered: queue.already_registered(),
            registered: 0,
            retried: 0,
            retries: 0,
            skipped: Vec::new(),
        }
    }

    pub fn record(&mut self, file: &FileRecord, outcome: IngestionOutcome) {
        match outcome {
            IngestionOutcome::Registered => self.registered += 1,
            IngestionOutcome::RetriedThenRegistered { retries } => {
                self.registered += 1;
                self.retried += 1;
                self.retries += u64::from(retries);
            },
            IngestionOutcome::Skipped { error } => self.skipped.push(SkippedFile {
                path: file.path.clone(),
                error,
            }),
        }
    }

    /// Files neither registered before nor handled in this run.
    pub fn remaining(&self) -> usize {
        self.manifest_files
            .saturating_sub(self.already_registered + self.registered + self.skipped.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub table: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub applied_migrations: Vec<String>,
    pub crawls: Vec<CrawlSummary>,
}

impl RunReport {
    pub fn new(run_id: Uuid, table: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            table: table.into(),
            started_at: now,
            finished_at: now,
            status: RunStatus::Completed,
            applied_migrations: Vec::new(),
            crawls: Vec::new(),
        }
    }

    pub fn finish(mut self, status: RunStatus) -> Self {
        self.status = status;
        self.finished_at = Utc::now();
        self
    }

    pub fn registered(&self) -> usize {
        self.crawls.iter().map(|c| c.registered).sum()
    }

    pub fn skipped(&self) -> usize {
        self.crawls.iter().map(|c| c.skipped.len()).sum()
    }

    pub fn retries(&self) -> u64 {
        self.crawls.iter().map(|c| c.retries).sum()
    }

    pub fn log_summary(&self) {
        for crawl in &self.crawls {
            info!(
                crawl = %crawl.crawl_id,
                files = crawl.manifest_files,
                already_registered = crawl.already_registered,
                registered = crawl.registered,
                retried = crawl.retried,
                skipped = crawl.skipped.len(),
                remaining = crawl.remaining(),
                "Crawl summary"
            );
            for skipped in &crawl.skipped {
                warn!(crawl = %crawl.crawl_id, file = %skipped.path, error = %skipped.error, "Skipped file");
            }
        }

        let elapsed = self.finished_at - self.started_at;
        info!(
            run_id = %self.run_id,
            table = %self.table,
            status = ?self.status,
            crawls = self.crawls.len(),
            registered = self.registered(),
            skipped = self.skipped(),
            retries = self.retries(),
            migrations = self.applied_migrations.len(),
            elapsed_secs = elapsed.num_seconds(),
            "Run finished"
        );
    }

    pub fn write_json(&self, path: &Path) -> ccindex_common::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Wrote run report");
        Ok(())
    }
}
