//! Per-file registration with retry
//!
//! Throttling from the upstream is transient but can last for minutes, so a
//! throttled registration is retried indefinitely after a long cool-down.
//! Every other failure skips the file; the next run will find it pending
//! again.

use ccindex_common::types::FileRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::catalog::{CatalogEngine, CatalogError};
use crate::config::DEFAULT_COOLDOWN_SECS;
use crate::error::error_chain;
use crate::pipeline::RunContext;
use crate::transport::DataLocator;

/// Decides whether a registration error is worth retrying.
pub trait RetryClassifier: Send + Sync {
    fn is_transient(&self, error: &CatalogError) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&CatalogError) -> bool + Send + Sync,
{
    fn is_transient(&self, error: &CatalogError) -> bool {
        self(error)
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    pub cooldown: Duration,
    classifier: Arc<dyn RetryClassifier>,
}

impl RetryPolicy {
    /// Retry upstream throttling after `cooldown`.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            classifier: Arc::new(CatalogError::is_throttled),
        }
    }

    pub fn with_classifier(mut self, classifier: impl RetryClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn is_transient(&self, error: &CatalogError) -> bool {
        self.classifier.is_transient(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_COOLDOWN_SECS))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestionOutcome {
    Registered,
    RetriedThenRegistered { retries: u32 },
    Skipped { error: String },
}

/// The run was cancelled before the file was registered.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("interrupted")]
pub struct Interrupted;

pub struct IngestionExecutor {
    catalog: Arc<dyn CatalogEngine>,
    locator: DataLocator,
    policy: RetryPolicy,
}

impl IngestionExecutor {
    pub fn new(catalog: Arc<dyn CatalogEngine>, locator: DataLocator, policy: RetryPolicy) -> Self {
        Self {
            catalog,
            locator,
            policy,
        }
    }

    /// Register `file` against the run's table.
    ///
    /// Cancellation is observed before each attempt and during cool-downs,
    /// never while a registration call is in flight.
    pub async fn ingest(
        &self,
        ctx: &RunContext,
        file: &FileRecord,
    ) -> Result<IngestionOutcome, Interrupted> {
        let location = self.locator.locate(file);
        let mut retries: u32 = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(Interrupted);
            }

            match self.catalog.register_file(&ctx.table, &location, true).await {
                Ok(()) if retries == 0 => {
                    debug!(file = %file.path, "Registered");
                    return Ok(IngestionOutcome::Registered);
                },
                Ok(()) => {
                    debug!(file = %file.path, retries, "Registered after retrying");
                    return Ok(IngestionOutcome::RetriedThenRegistered { retries });
                },
                Err(e) if self.policy.is_transient(&e) => {
                    retries += 1;
                    warn!(
                        file = %file.path,
                        retries,
                        cooldown_secs = self.policy.cooldown.as_secs(),
                        error = %error_chain(&e),
                        "Transient failure, cooling down before retrying"
                    );
                    if ctx.cancel.sleep_or_cancelled(self.policy.cooldown).await {
                        return Err(Interrupted);
                    }
                },
                Err(e) => {
                    let message = error_chain(&e);
                    error!(file = %file.path, error = %message, "Skipping file");
                    return Ok(IngestionOutcome::Skipped { error: message });
                },
            }
        }
    }
}
