//! Origin Fetcher - Slow Path
//!
//! Retrieves encoded bytes from the authoritative source and decodes them.
//! Consulted only when neither tier holds an entry.
//!
//! # Design
//!
//! - [`ByteSource`] abstracts the transport; [`HttpSource`] is the default
//! - One overall deadline of `connect + read` wraps each fetch
//! - Decoding runs on the blocking pool
//! - No retries; callers see the first failure

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use super::decode::Decoder;
use super::entry::{DecodedPayload, Dimensions};
use crate::error::{Error, Result};

/// Why an origin lookup failed. Always recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, DNS or HTTP status failure
    #[error("Network error: {0}")]
    Network(String),

    /// Connect, read or overall deadline exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Bytes could not be decoded
    #[error("Decode failed: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Connect and read timeouts for origin requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl FetchTimeouts {
    /// Overall deadline for one fetch
    pub fn total(&self) -> Duration {
        self.connect.saturating_add(self.read)
    }
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(10_000),
            read: Duration::from_millis(15_000),
        }
    }
}

/// Transport for encoded bytes
#[async_trait]
pub trait ByteSource: Send + Sync + 'static {
    /// Fetch the encoded bytes for `identifier`
    async fn fetch_bytes(&self, identifier: &str) -> std::result::Result<Bytes, FetchError>;
}

// =============================================================================
// HTTP Source
// =============================================================================

/// Fetches identifiers as URLs over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Build a client honouring `timeouts`
    pub fn new(timeouts: FetchTimeouts) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .user_agent(concat!("blobtier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn fetch_bytes(&self, identifier: &str) -> std::result::Result<Bytes, FetchError> {
        let response = self.client.get(identifier).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "HTTP {} for {}",
                status, identifier
            )));
        }

        Ok(response.bytes().await?)
    }
}

// =============================================================================
// In-Memory Source
// =============================================================================

/// Origin backed by a map, for tests and embedding.
///
/// Counts every call, can delay responses and can be told to fail specific
/// identifiers.
#[derive(Default)]
pub struct InMemorySource {
    objects: RwLock<HashMap<String, Bytes>>,
    failures: RwLock<HashMap<String, FetchError>>,
    latency: Option<Duration>,
    calls: AtomicU64,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Serve `bytes` for `identifier`
    pub fn insert(&self, identifier: impl Into<String>, bytes: impl Into<Bytes>) {
        self.objects.write().insert(identifier.into(), bytes.into());
    }

    /// Stop serving `identifier`
    pub fn remove(&self, identifier: &str) {
        self.objects.write().remove(identifier);
    }

    /// Fail every fetch of `identifier` with `error`
    pub fn fail_with(&self, identifier: impl Into<String>, error: FetchError) {
        self.failures.write().insert(identifier.into(), error);
    }

    /// Number of fetches received
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ByteSource for InMemorySource {
    async fn fetch_bytes(&self, identifier: &str) -> std::result::Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.failures.read().get(identifier) {
            return Err(error.clone());
        }

        self.objects
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| FetchError::Network(format!("not found: {}", identifier)))
    }
}

#[async_trait]
impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    async fn fetch_bytes(&self, identifier: &str) -> std::result::Result<Bytes, FetchError> {
        (**self).fetch_bytes(identifier).await
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// Result of a successful origin fetch
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Encoded bytes as received (what the disk tier stores)
    pub bytes: Bytes,
    /// Decoded payload (what the memory tier stores)
    pub payload: DecodedPayload,
}

/// Origin fetcher
pub struct OriginFetcher {
    source: Arc<dyn ByteSource>,
    decoder: Arc<dyn Decoder>,
    timeouts: FetchTimeouts,
    bounds: Dimensions,
}

impl OriginFetcher {
    pub fn new(
        source: Arc<dyn ByteSource>,
        decoder: Arc<dyn Decoder>,
        timeouts: FetchTimeouts,
        bounds: Dimensions,
    ) -> Self {
        Self {
            source,
            decoder,
            timeouts,
            bounds,
        }
    }

    /// Fetch and decode `identifier`
    pub async fn fetch(&self, identifier: &str) -> std::result::Result<Fetched, FetchError> {
        let deadline = self.timeouts.total();
        let bytes = tokio::time::timeout(deadline, self.source.fetch_bytes(identifier))
            .await
            .map_err(|_| FetchError::Timeout(format!("no response within {:?}", deadline)))??;

        debug!("Fetched {} bytes from origin", bytes.len());
        let payload = self.decode(bytes.clone()).await?;
        Ok(Fetched { bytes, payload })
    }

    /// Decode bytes on the blocking pool
    pub async fn decode(&self, bytes: Bytes) -> std::result::Result<DecodedPayload, FetchError> {
        let decoder = Arc::clone(&self.decoder);
        let bounds = self.bounds;

        tokio::task::spawn_blocking(move || decoder.decode(&bytes, bounds))
            .await
            .map_err(|e| FetchError::Decode(format!("decode task failed: {}", e)))?
    }

    pub fn timeouts(&self) -> FetchTimeouts {
        self.timeouts
    }

    pub fn bounds(&self) -> Dimensions {
        self.bounds
    }
}

impl fmt::Debug for OriginFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginFetcher")
            .field("timeouts", &self.timeouts)
            .field("bounds", &self.bounds)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
