//! Error types shared across the ccindex crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Error type for the shared building blocks
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid crawl id '{0}': expected a non-empty id made of letters, digits, '-' or '_'")]
    InvalidCrawlId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl CommonError {
    pub fn config(message: impl Into<String>) -> Self {
        CommonError::Config(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        CommonError::Parse(message.into())
    }
}
