//! Error types for blobtier
//!
//! Only construction and operator-facing failures live here. Lookup failures
//! travel inside [`FetchResult`](crate::cache::FetchResult) as a
//! [`FetchError`](crate::cache::FetchError), and disk tier I/O errors never
//! leave the disk tier at all.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or operating a cache engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// HTTP client construction failed
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Metrics encoding failed
    #[error("Metrics encoding failed: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
