//! Common types used across ccindex

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// Identifier of a crawl period, e.g. `CC-MAIN-2021-49`.
///
/// Crawl ids sort lexically in chronological order, so the derived `Ord` is
/// the processing order of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CrawlId(String);

impl CrawlId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl FromStr for CrawlId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if Self::is_valid(trimmed) {
            Ok(CrawlId(trimmed.to_string()))
        } else {
            Err(CommonError::InvalidCrawlId(s.to_string()))
        }
    }
}

impl TryFrom<String> for CrawlId {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CrawlId> for String {
    fn from(id: CrawlId) -> Self {
        id.0
    }
}

impl AsRef<str> for CrawlId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CrawlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remote columnar file belonging to one crawl.
///
/// `path` is relative to the data base of the active transport. The derived
/// ordering compares `crawl_id` first and `path` second, which is the
/// manifest order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    pub crawl_id: CrawlId,
    pub path: String,
}

impl FileRecord {
    pub fn new(crawl_id: CrawlId, path: impl Into<String>) -> Self {
        Self {
            crawl_id,
            path: path.into(),
        }
    }

    /// Hive-style `key=value` segments of the path, in path order.
    pub fn partition_values(&self) -> Vec<(&str, &str)> {
        hive_partitions(&self.path)
    }

    pub fn partition_value(&self, key: &str) -> Option<&str> {
        self.partition_values()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.crawl_id, self.path)
    }
}

/// Extract the hive partition segments (`crawl=CC-MAIN-2013-20`) from a path
/// or URL. The file name itself is never treated as a partition.
pub fn hive_partitions(path: &str) -> Vec<(&str, &str)> {
    let mut segments: Vec<&str> = path.split('/').collect();
    segments.pop();
    segments
        .into_iter()
        .filter_map(|segment| segment.split_once('='))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .collect()
}
