//! Cache Engine - Unified Two-Tier Cache
//!
//! Orchestrates the memory tier, the disk tier and the origin fetcher:
//! lookups fall through Memory -> Disk -> Origin, disk hits are promoted into
//! memory, and origin results are written to both tiers.
//!
//! Concurrent lookups of the same missing key share one origin flight.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::decode::{Decoder, PassthroughDecoder};
use super::disk::{DiskTier, TrimReport};
use super::entry::DecodedPayload;
use super::key::CacheKey;
use super::memory::MemoryTier;
use super::metrics::{CacheMetrics, CacheStats, TierGauges};
use super::origin::{ByteSource, FetchError, HttpSource, OriginFetcher};
use crate::config::CacheConfig;
use crate::error::Result;

/// Where a lookup was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Memory tier (hot)
    Memory,
    /// Disk tier (warm)
    Disk,
    /// Origin (cold)
    Origin,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Memory => write!(f, "memory"),
            Source::Disk => write!(f, "disk"),
            Source::Origin => write!(f, "origin"),
        }
    }
}

/// Outcome of a lookup
#[derive(Debug, Clone)]
pub enum FetchResult {
    Success {
        payload: DecodedPayload,
        source: Source,
    },
    Failure(FetchError),
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    pub fn payload(&self) -> Option<&DecodedPayload> {
        match self {
            FetchResult::Success { payload, .. } => Some(payload),
            FetchResult::Failure(_) => None,
        }
    }

    pub fn source(&self) -> Option<Source> {
        match self {
            FetchResult::Success { source, .. } => Some(*source),
            FetchResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchResult::Success { .. } => None,
            FetchResult::Failure(e) => Some(e),
        }
    }

    /// Convert into a standard `Result`
    pub fn into_result(self) -> std::result::Result<(DecodedPayload, Source), FetchError> {
        match self {
            FetchResult::Success { payload, source } => Ok((payload, source)),
            FetchResult::Failure(e) => Err(e),
        }
    }
}

/// Counts from a preload run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadSummary {
    /// Identifiers submitted
    pub requested: usize,
    /// Already in the memory or disk tier
    pub already_cached: usize,
    /// Fetched from origin
    pub fetched: usize,
    /// Origin failures
    pub failed: usize,
}

type FlightFuture = BoxFuture<'static, std::result::Result<DecodedPayload, FetchError>>;

/// In-flight origin fetch; the table never keeps a flight alive on its own
struct Flight {
    id: u64,
    handle: Option<WeakShared<FlightFuture>>,
}

impl Flight {
    fn join(&self) -> Option<Shared<FlightFuture>> {
        self.handle.as_ref().and_then(WeakShared::upgrade)
    }
}

/// Removes a flight's table entry when its future completes or is dropped
struct FlightGuard {
    inner: Arc<EngineInner>,
    key: CacheKey,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner
            .flights
            .remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

struct EngineInner {
    config: CacheConfig,
    memory: MemoryTier,
    disk: DiskTier,
    origin: OriginFetcher,
    metrics: CacheMetrics,
    flights: DashMap<CacheKey, Flight>,
    next_flight: AtomicU64,
}

impl EngineInner {
    /// Origin fetch followed by the dual write. Runs once per flight.
    async fn run_flight(
        &self,
        identifier: &str,
        key: &CacheKey,
    ) -> std::result::Result<DecodedPayload, FetchError> {
        self.metrics.record_origin_fetch();

        let fetched = match self.origin.fetch(identifier).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.metrics.record_origin_failure();
                warn!("Origin fetch failed for {}: {}", key.short(), e);
                return Err(e);
            }
        };

        let encoded_size = fetched.bytes.len() as u64;
        if encoded_size < self.config.min_size_to_cache {
            debug!(
                "Not caching {} ({} bytes < {})",
                key.short(),
                encoded_size,
                self.config.min_size_to_cache
            );
            return Ok(fetched.payload);
        }

        if !self.disk.store(key, fetched.bytes).await {
            debug!("Continuing without disk copy of {}", key.short());
        }
        let payload = fetched.payload;
        self.memory
            .put(key.clone(), payload.clone(), payload.size_bytes());

        Ok(payload)
    }
}

/// Two-tier cache engine.
///
/// Cheap to clone; clones share the same tiers and statistics.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

impl CacheEngine {
    /// Create an engine fetching over HTTP
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building an engine with custom collaborators
    pub fn builder(config: CacheConfig) -> CacheEngineBuilder {
        CacheEngineBuilder {
            config,
            source: None,
            decoder: Arc::new(PassthroughDecoder),
        }
    }

    /// Look up `identifier`, falling through Memory -> Disk -> Origin
    pub async fn get(&self, identifier: &str) -> FetchResult {
        let key = CacheKey::digest(identifier);
        self.lookup(identifier, key).await
    }

    #[instrument(level = "debug", skip_all, fields(key = %key.short()))]
    async fn lookup(&self, identifier: &str, key: CacheKey) -> FetchResult {
        let inner = &self.inner;

        if let Some(payload) = inner.memory.get(&key) {
            inner.metrics.record_memory_hit();
            debug!("Memory hit");
            return FetchResult::Success {
                payload,
                source: Source::Memory,
            };
        }
        inner.metrics.record_memory_miss();

        if let Some(payload) = self.load_from_disk(&key).await {
            inner.metrics.record_disk_hit();
            debug!("Disk hit");
            return FetchResult::Success {
                payload,
                source: Source::Disk,
            };
        }
        inner.metrics.record_disk_miss();

        match self.fetch_coalesced(identifier, key).await {
            Ok(payload) => FetchResult::Success {
                payload,
                source: Source::Origin,
            },
            Err(e) => FetchResult::Failure(e),
        }
    }

    /// Read, decode and promote a disk entry. Undecodable copies are deleted.
    async fn load_from_disk(&self, key: &CacheKey) -> Option<DecodedPayload> {
        let inner = &self.inner;
        let bytes = inner.disk.load(key).await?;

        match inner.origin.decode(bytes).await {
            Ok(payload) => {
                inner
                    .memory
                    .put(key.clone(), payload.clone(), payload.size_bytes());
                Some(payload)
            }
            Err(e) => {
                warn!("Discarding undecodable disk entry {}: {}", key.short(), e);
                inner.disk.remove(key).await;
                None
            }
        }
    }

    /// Join the in-flight fetch for `key`, or start one
    async fn fetch_coalesced(
        &self,
        identifier: &str,
        key: CacheKey,
    ) -> std::result::Result<DecodedPayload, FetchError> {
        let flight = match self.inner.flights.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get().join() {
                Some(shared) => {
                    self.inner.metrics.record_coalesced_fetch();
                    debug!("Joined in-flight origin fetch");
                    shared
                }
                None => {
                    let (flight, shared) = self.start_flight(identifier, key);
                    occupied.insert(flight);
                    shared
                }
            },
            Entry::Vacant(vacant) => {
                let (flight, shared) = self.start_flight(identifier, key);
                vacant.insert(flight);
                shared
            }
        };

        flight.await
    }

    /// Build (without polling) a shared flight for `key`
    fn start_flight(&self, identifier: &str, key: CacheKey) -> (Flight, Shared<FlightFuture>) {
        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key,
            id,
        };
        let identifier = identifier.to_string();

        let future: FlightFuture = async move {
            // Owned by the future so it drops with the flight
            let guard = guard;
            guard.inner.run_flight(&identifier, &guard.key).await
        }
        .boxed();
        let shared = future.shared();
        let handle = shared.downgrade();

        (Flight { id, handle }, shared)
    }

    /// Warm the cache for each identifier, with bounded concurrency
    #[instrument(skip_all)]
    pub async fn preload<I, S>(&self, identifiers: I) -> PreloadSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifiers: Vec<String> = identifiers
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();
        let mut summary = PreloadSummary {
            requested: identifiers.len(),
            ..Default::default()
        };

        let mut results = stream::iter(identifiers)
            .map(|id| async move { self.get(&id).await })
            .buffer_unordered(self.inner.config.preload_concurrency.max(1));

        while let Some(result) = results.next().await {
            match result {
                FetchResult::Success {
                    source: Source::Origin,
                    ..
                } => summary.fetched += 1,
                FetchResult::Success { .. } => summary.already_cached += 1,
                FetchResult::Failure(_) => summary.failed += 1,
            }
        }

        info!(
            "Preload complete: {} requested, {} fetched, {} already cached, {} failed",
            summary.requested, summary.fetched, summary.already_cached, summary.failed
        );
        summary
    }

    /// Check if either tier holds `identifier`. Never contacts origin and
    /// does not affect recency.
    pub async fn is_cached(&self, identifier: &str) -> bool {
        let key = CacheKey::digest(identifier);
        self.inner.memory.contains(&key) || self.inner.disk.contains(&key).await
    }

    /// Remove `identifier` from both tiers. Returns `true` if anything was removed.
    #[instrument(level = "debug", skip(self))]
    pub async fn evict(&self, identifier: &str) -> bool {
        let key = CacheKey::digest(identifier);
        let from_memory = self.inner.memory.remove(&key).is_some();
        let from_disk = self.inner.disk.remove(&key).await;
        from_memory || from_disk
    }

    /// Drop every memory tier entry
    pub fn clear_memory(&self) {
        self.inner.memory.clear();
        debug!("Memory tier cleared");
    }

    /// Delete every disk tier file. Returns the number removed.
    pub async fn clear_disk(&self) -> usize {
        let removed = self.inner.disk.clear_all().await;
        info!("Disk tier cleared ({} files)", removed);
        removed
    }

    /// Age trim then size trim of the disk tier
    #[instrument(skip(self))]
    pub async fn trim_disk(&self) -> TrimReport {
        let report = self
            .inner
            .disk
            .trim(&self.inner.config.retention_policy())
            .await;
        info!(
            "Disk trim removed {} entries ({} bytes), {} bytes remain",
            report.removed, report.freed_bytes, report.remaining_bytes
        );
        report
    }

    /// Snapshot of counters and tier sizes
    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        inner.metrics.snapshot(TierGauges {
            evictions: inner.memory.evictions(),
            memory_resident_bytes: inner.memory.current_size_bytes(),
            memory_capacity_bytes: inner.memory.capacity_bytes(),
            memory_entries: inner.memory.len() as u64,
            disk_resident_bytes: inner.disk.resident_bytes(),
        })
    }

    /// Zero all counters
    pub fn reset_stats(&self) {
        self.inner.metrics.reset(self.inner.memory.evictions());
    }

    /// Run `trim_disk` every `interval` until `token` is cancelled
    pub fn spawn_maintenance(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            info!("Disk maintenance every {:?}", interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Disk maintenance stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        engine.trim_disk().await;
                    }
                }
            }
        })
    }

    /// Start maintenance at the configured interval, if any
    pub fn start_maintenance(&self, token: CancellationToken) -> Option<JoinHandle<()>> {
        self.inner
            .config
            .maintenance_interval()
            .map(|interval| self.spawn_maintenance(interval, token))
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get reference to the memory tier
    pub fn memory(&self) -> &MemoryTier {
        &self.inner.memory
    }

    /// Get reference to the disk tier
    pub fn disk(&self) -> &DiskTier {
        &self.inner.disk
    }

    /// Origin fetches currently in flight
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }
}

impl fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("memory_capacity", &self.inner.memory.capacity_bytes())
            .field("disk", &self.inner.disk)
            .field("origin", &self.inner.origin)
            .finish()
    }
}

/// Builder for [`CacheEngine`]
pub struct CacheEngineBuilder {
    config: CacheConfig,
    source: Option<Arc<dyn ByteSource>>,
    decoder: Arc<dyn Decoder>,
}

impl CacheEngineBuilder {
    /// Fetch from `source` instead of HTTP
    pub fn source(mut self, source: impl ByteSource) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Decode with `decoder` instead of keeping bytes as-is
    pub fn decoder(mut self, decoder: impl Decoder) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Validate the configuration, open the disk tier and size the memory tier
    pub fn build(self) -> Result<CacheEngine> {
        let config = self.config;
        config.validate()?;

        let source: Arc<dyn ByteSource> = match self.source {
            Some(source) => source,
            None => Arc::new(HttpSource::new(config.timeouts())?),
        };

        let capacity = config.memory_budget().resolve();
        let disk = DiskTier::open(&config.cache_dir);
        let origin = OriginFetcher::new(
            source,
            self.decoder,
            config.timeouts(),
            config.target_dimensions(),
        );

        info!(
            "Cache engine ready: memory {} bytes, disk {} at {}",
            capacity,
            config.disk_budget_bytes,
            config.cache_dir.display()
        );

        Ok(CacheEngine {
            inner: Arc::new(EngineInner {
                memory: MemoryTier::new(capacity),
                disk,
                origin,
                metrics: CacheMetrics::new(),
                flights: DashMap::new(),
                next_flight: AtomicU64::new(0),
                config,
            }),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::origin::InMemorySource;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn engine_with(tmp: &TempDir, source: Arc<InMemorySource>) -> CacheEngine {
        CacheEngine::builder(CacheConfig::with_cache_dir(tmp.path()))
            .source(source)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_cache_engine_creation() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(&tmp, Arc::new(InMemorySource::new()));

        let stats = engine.stats();
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.disk_resident_bytes, 0);
        assert!(stats.memory_capacity_bytes <= 32 * 1024 * 1024);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cache_engine_tier_fallthrough() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(InMemorySource::new());
        source.insert("img://a", Bytes::from_static(b"Hello, World!"));
        let engine = engine_with(&tmp, source.clone());

        let first = engine.get("img://a").await;
        assert_eq!(first.source(), Some(Source::Origin));
        assert_eq!(first.payload().unwrap().data().as_ref(), b"Hello, World!");

        let second = engine.get("img://a").await;
        assert_eq!(second.source(), Some(Source::Memory));

        engine.clear_memory();
        let third = engine.get("img://a").await;
        assert_eq!(third.source(), Some(Source::Disk));

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_engine_miss_is_failure() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(&tmp, Arc::new(InMemorySource::new()));

        let result = engine.get("img://nonexistent").await;
        assert!(!result.is_success());
        assert_matches!(result.error(), Some(FetchError::Network(_)));
        assert_eq!(engine.stats().origin_failures, 1);
    }

    #[tokio::test]
    async fn test_cache_engine_evict() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(InMemorySource::new());
        source.insert("img://a", Bytes::from_static(b"data"));
        let engine = engine_with(&tmp, source);

        engine.get("img://a").await;
        assert!(engine.is_cached("img://a").await);

        assert!(engine.evict("img://a").await);
        assert!(!engine.is_cached("img://a").await);
        assert!(!engine.evict("img://a").await);
    }

    #[tokio::test]
    async fn test_flight_table_empties_after_completion() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(InMemorySource::new());
        source.insert("img://a", Bytes::from_static(b"data"));
        let engine = engine_with(&tmp, source);

        engine.get("img://a").await;
        engine.get("img://missing").await;
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(InMemorySource::new());
        source.insert("img://a", Bytes::from_static(b"data"));
        let engine = engine_with(&tmp, source);

        engine.get("img://a").await;
        engine.get("img://a").await;

        let stats = engine.stats();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.memory_misses, 1);
        assert_eq!(stats.disk_misses, 1);
        assert_eq!(stats.origin_fetches, 1);
        assert_eq!(stats.memory_entries, 1);
        assert_eq!(stats.disk_resident_bytes, 4);

        engine.reset_stats();
        let stats = engine.stats();
        assert_eq!(stats.memory_hits, 0);
        assert_eq!(stats.origin_fetches, 0);
        // Gauges are not counters
        assert_eq!(stats.memory_entries, 1);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(Source::Memory.to_string(), "memory");
        assert_eq!(Source::Disk.to_string(), "disk");
        assert_eq!(Source::Origin.to_string(), "origin");
    }

    #[test]
    fn test_fetch_result_into_result() {
        let ok = FetchResult::Success {
            payload: DecodedPayload::new(Bytes::from_static(b"x")),
            source: Source::Disk,
        };
        assert_matches!(ok.into_result(), Ok((_, Source::Disk)));

        let err = FetchResult::Failure(FetchError::Timeout("slow".to_string()));
        assert_matches!(err.into_result(), Err(FetchError::Timeout(_)));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = CacheConfig {
            preload_concurrency: 0,
            ..Default::default()
        };
        assert!(CacheEngine::builder(config)
            .source(InMemorySource::new())
            .build()
            .is_err());
    }
}
