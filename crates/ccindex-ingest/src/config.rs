//! Ingestion configuration
//!
//! Defaults, transport selection and validation for a pipeline run. The CLI
//! in `main.rs` fills an [`IngestConfig`]; everything else reads from it.

use ccindex_common::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Crawl registry published by Common Crawl.
pub const DEFAULT_REGISTRY_URL: &str = "https://index.commoncrawl.org/collinfo.json";

/// Local registry copy preferred over the remote one when present.
pub const LOCAL_REGISTRY_FILE: &str = "collinfo.json";

/// Base of the per-crawl path lists. Listings are always fetched over HTTPS.
pub const DEFAULT_LISTING_BASE: &str = "https://data.commoncrawl.org/";

/// Data base for unauthenticated access.
pub const PUBLIC_DATA_BASE: &str = "https://data.commoncrawl.org/";

/// Data base for authenticated direct S3 access.
pub const S3_DATA_BASE: &str = "s3://commoncrawl/";

pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Cool-down after a throttling response. Upstream throttling clears slowly.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_TABLE: &str = "archives";

pub const DEFAULT_CATALOG_PATH: &str = "commoncrawl.sqlite";

pub const DEFAULT_CACHE_DIR: &str = ".ccindex-cache";

pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

// ============================================================================
// Transport selection
// ============================================================================

/// Requested transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// S3 when credentials are present in the environment, public HTTPS otherwise
    #[default]
    Auto,
    /// Unauthenticated HTTPS access
    Public,
    /// Authenticated direct S3 access
    S3,
}

/// Static S3 credentials taken from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Transport after auto-detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTransport {
    Public,
    /// `credentials: None` means the default AWS provider chain.
    S3 {
        credentials: Option<StaticCredentials>,
    },
}

impl ResolvedTransport {
    pub fn data_base(&self) -> &'static str {
        match self {
            ResolvedTransport::Public => PUBLIC_DATA_BASE,
            ResolvedTransport::S3 { .. } => S3_DATA_BASE,
        }
    }
}

impl fmt::Display for ResolvedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedTransport::Public => f.write_str("public https"),
            ResolvedTransport::S3 { credentials: Some(_) } => f.write_str("s3 (environment credentials)"),
            ResolvedTransport::S3 { credentials: None } => f.write_str("s3 (default credential chain)"),
        }
    }
}

impl TransportMode {
    /// Resolve the mode against an environment lookup.
    pub fn resolve(self, lookup: impl Fn(&str) -> Option<String>) -> ResolvedTransport {
        let credentials = match (lookup(ACCESS_KEY_ENV), lookup(SECRET_KEY_ENV)) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(StaticCredentials {
                    access_key_id: key,
                    secret_access_key: secret,
                })
            },
            _ => None,
        };

        match (self, credentials) {
            (TransportMode::Public, _) => ResolvedTransport::Public,
            (TransportMode::S3, credentials) => ResolvedTransport::S3 { credentials },
            (TransportMode::Auto, Some(credentials)) => ResolvedTransport::S3 {
                credentials: Some(credentials),
            },
            (TransportMode::Auto, None) => ResolvedTransport::Public,
        }
    }
}

// ============================================================================
// Run configuration
// ============================================================================

/// Configuration of one ingestion run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub transport: TransportMode,
    /// SQLite file holding the catalog
    pub catalog_path: PathBuf,
    /// Target table name
    pub table: String,
    /// Explicit registry path or URL; `None` prefers `./collinfo.json`, then the remote registry
    pub registry: Option<String>,
    pub listing_base: String,
    pub cache_dir: PathBuf,
    /// Read listings from the cache instead of the network
    pub offline: bool,
    pub cooldown: Duration,
    pub http_timeout: Duration,
    pub s3_region: String,
    /// Where to write the JSON run report
    pub report_path: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Auto,
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            table: DEFAULT_TABLE.to_string(),
            registry: None,
            listing_base: DEFAULT_LISTING_BASE.to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            offline: false,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            s3_region: DEFAULT_S3_REGION.to_string(),
            report_path: None,
            show_progress: true,
        }
    }
}

impl IngestConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CommonError> {
        if !is_identifier(&self.table) {
            return Err(CommonError::config(format!(
                "table name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                self.table
            )));
        }
        if self.cooldown.is_zero() {
            return Err(CommonError::config("cool-down must be greater than 0 seconds"));
        }
        if self.http_timeout.is_zero() {
            return Err(CommonError::config("HTTP timeout must be greater than 0 seconds"));
        }
        if !self.listing_base.ends_with('/') {
            return Err(CommonError::config(format!(
                "listing base '{}' must end with '/'",
                self.listing_base
            )));
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        _ => false,
    }
}
