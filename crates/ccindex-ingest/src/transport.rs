//! Remote object access
//!
//! Listings and registry documents are always fetched over public HTTPS.
//! Data files (their Parquet footers) are read through the transport chosen
//! at startup: public HTTPS or authenticated S3.

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use ccindex_common::types::FileRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ResolvedTransport, StaticCredentials, PUBLIC_DATA_BASE, S3_DATA_BASE};

/// Statuses the upstream uses to signal throttling. CloudFront answers
/// `403` under load, S3 answers `503 SlowDown`.
pub const THROTTLE_STATUSES: [u16; 3] = [403, 429, 503];

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{location} is throttled (HTTP {status})")]
    Throttled { location: String, status: u16 },

    #[error("{0} was not found")]
    NotFound(String),

    #[error("unexpected HTTP {status} for {location}")]
    Status { location: String, status: u16 },

    #[error("request to {location} failed")]
    Request {
        location: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("S3 request for {location} failed: {message}")]
    S3 {
        location: String,
        status: Option<u16>,
        message: String,
    },

    #[error("'{0}' is not a valid location for this transport")]
    InvalidLocation(String),

    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
}

impl TransportError {
    pub fn from_status(location: &str, status: u16) -> Self {
        if status == 404 {
            TransportError::NotFound(location.to_string())
        } else if THROTTLE_STATUSES.contains(&status) {
            TransportError::Throttled {
                location: location.to_string(),
                status,
            }
        } else {
            TransportError::Status {
                location: location.to_string(),
                status,
            }
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, TransportError::Throttled { .. })
    }
}

/// Read access to remote objects.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a whole object.
    async fn get(&self, location: &str) -> Result<Vec<u8>, TransportError>;

    /// Fetch the last `len` bytes of an object, or the whole object when it is
    /// shorter than `len`.
    async fn get_suffix(&self, location: &str, len: usize) -> Result<Vec<u8>, TransportError>;
}

fn tail(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    if bytes.len() > len {
        bytes.split_off(bytes.len() - len)
    } else {
        bytes
    }
}

// ============================================================================
// HTTPS
// ============================================================================

/// Unauthenticated HTTPS access through `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ccindex-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        location: &str,
        suffix: Option<usize>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = self.client.get(location);
        if let Some(len) = suffix {
            request = request.header(reqwest::header::RANGE, format!("bytes=-{}", len));
        }

        let response = request
            .send()
            .await
            .map_err(|source| TransportError::Request {
                location: location.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(TransportError::from_status(location, status.as_u16()))
        }
    }

    async fn body(location: &str, response: reqwest::Response) -> Result<Vec<u8>, TransportError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|source| TransportError::Request {
                location: location.to_string(),
                source,
            })?;
        debug!(location, bytes = bytes.len(), "Fetched object");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn get(&self, location: &str) -> Result<Vec<u8>, TransportError> {
        let response = self.send(location, None).await?;
        Self::body(location, response).await
    }

    async fn get_suffix(&self, location: &str, len: usize) -> Result<Vec<u8>, TransportError> {
        let response = self.send(location, Some(len)).await?;
        // A server that ignores Range answers 200 with the full object.
        Ok(tail(Self::body(location, response).await?, len))
    }
}

// ============================================================================
// S3
// ============================================================================

/// Authenticated S3 access through `aws-sdk-s3`.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn with_credentials(credentials: &StaticCredentials, region: &str) -> Self {
        let provider = Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,
            None,
            "ccindex-environment",
        );

        let config = aws_sdk_s3::Config::builder()
            .credentials_provider(provider)
            .region(Region::new(region.to_string()))
            .build();

        Self {
            client: Client::from_conf(config),
        }
    }

    pub async fn from_default_chain(region: &str) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: Client::new(&shared),
        }
    }

    /// Split `s3://bucket/key` into bucket and key.
    pub fn split_location(location: &str) -> Result<(&str, &str), TransportError> {
        location
            .strip_prefix("s3://")
            .and_then(|rest| rest.split_once('/'))
            .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
            .ok_or_else(|| TransportError::InvalidLocation(location.to_string()))
    }

    async fn get_object(
        &self,
        location: &str,
        range: Option<String>,
    ) -> Result<Vec<u8>, TransportError> {
        let (bucket, key) = Self::split_location(location)?;

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range)
            .send()
            .await
            .map_err(|err| {
                let status = err.raw_response().map(|response| response.status().as_u16());
                s3_error(location, status, DisplayErrorContext(&err).to_string())
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| s3_error(location, None, err.to_string()))?;

        let bytes = body.into_bytes().to_vec();
        debug!(location, bytes = bytes.len(), "Fetched S3 object");
        Ok(bytes)
    }
}

fn s3_error(location: &str, status: Option<u16>, message: String) -> TransportError {
    match status {
        Some(status) if status == 404 || THROTTLE_STATUSES.contains(&status) => {
            TransportError::from_status(location, status)
        },
        _ => TransportError::S3 {
            location: location.to_string(),
            status,
            message,
        },
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn get(&self, location: &str) -> Result<Vec<u8>, TransportError> {
        self.get_object(location, None).await
    }

    async fn get_suffix(&self, location: &str, len: usize) -> Result<Vec<u8>, TransportError> {
        let bytes = self
            .get_object(location, Some(format!("bytes=-{}", len)))
            .await?;
        Ok(tail(bytes, len))
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Objects served from memory, with scripted failures per location.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<String, Vec<u8>>,
    failures: HashMap<String, VecDeque<TransportError>>,
    requests: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.lock().objects.insert(location.into(), bytes.into());
    }

    /// Make the next request for `location` fail with `error`. Failures queue up.
    pub fn fail_next(&self, location: impl Into<String>, error: TransportError) {
        self.lock()
            .failures
            .entry(location.into())
            .or_default()
            .push_back(error);
    }

    /// Every location requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fetch(&self, location: &str) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        state.requests.push(location.to_string());

        if let Some(error) = state
            .failures
            .get_mut(location)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        state
            .objects
            .get(location)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(location.to_string()))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, location: &str) -> Result<Vec<u8>, TransportError> {
        self.fetch(location)
    }

    async fn get_suffix(&self, location: &str, len: usize) -> Result<Vec<u8>, TransportError> {
        Ok(tail(self.fetch(location)?, len))
    }
}

// ============================================================================
// Locations
// ============================================================================

/// Turns manifest paths into fetchable locations for the active transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLocator {
    base: String,
}

impl DataLocator {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn locate(&self, record: &FileRecord) -> String {
        format!("{}{}", self.base, record.path)
    }

    /// Path of `location` relative to whichever data base it was built from.
    ///
    /// Inventories recorded under the public base and under the S3 base
    /// compare equal, so switching transports between runs stays idempotent.
    pub fn relative_path<'a>(&self, location: &'a str) -> &'a str {
        [self.base.as_str(), PUBLIC_DATA_BASE, S3_DATA_BASE]
            .iter()
            .find_map(|base| location.strip_prefix(base))
            .unwrap_or(location)
    }
}

/// The stores and locator for one run.
#[derive(Clone)]
pub struct Transport {
    pub listings: Arc<dyn RemoteStore>,
    pub data: Arc<dyn RemoteStore>,
    pub locator: DataLocator,
}

impl Transport {
    pub async fn connect(
        resolved: &ResolvedTransport,
        region: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = Arc::new(HttpStore::new(timeout)?);

        let data: Arc<dyn RemoteStore> = match resolved {
            ResolvedTransport::Public => http.clone(),
            ResolvedTransport::S3 {
                credentials: Some(credentials),
            } => Arc::new(S3Store::with_credentials(credentials, region)),
            ResolvedTransport::S3 { credentials: None } => {
                Arc::new(S3Store::from_default_chain(region).await)
            },
        };

        info!(
            transport = %resolved,
            data_base = resolved.data_base(),
            "Transport ready"
        );

        Ok(Self {
            listings: http,
            data,
            locator: DataLocator::new(resolved.data_base()),
        })
    }
}
