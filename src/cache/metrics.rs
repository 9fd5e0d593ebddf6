//! Cache Metrics Collection
//!
//! Lock-free counters for monitoring cache health, point-in-time snapshots,
//! and Prometheus text exposition.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Memory tier
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,

    // Disk tier
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,

    // Origin
    origin_fetches: AtomicU64,
    origin_failures: AtomicU64,
    coalesced_fetches: AtomicU64,

    /// Evictions already reported before the last reset
    eviction_baseline: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// An origin flight was started
    pub fn record_origin_fetch(&self) {
        self.origin_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_origin_failure(&self) {
        self.origin_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup joined a flight started by another caller
    pub fn record_coalesced_fetch(&self) {
        self.coalesced_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn memory_misses(&self) -> u64 {
        self.memory_misses.load(Ordering::Relaxed)
    }

    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn disk_misses(&self) -> u64 {
        self.disk_misses.load(Ordering::Relaxed)
    }

    pub fn origin_fetches(&self) -> u64 {
        self.origin_fetches.load(Ordering::Relaxed)
    }

    pub fn origin_failures(&self) -> u64 {
        self.origin_failures.load(Ordering::Relaxed)
    }

    pub fn coalesced_fetches(&self) -> u64 {
        self.coalesced_fetches.load(Ordering::Relaxed)
    }

    /// Snapshot counters together with the tiers' point-in-time gauges.
    ///
    /// `tier_evictions` is the memory tier's lifetime eviction count; the
    /// snapshot reports evictions since the last reset.
    pub fn snapshot(&self, tiers: TierGauges) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits(),
            memory_misses: self.memory_misses(),
            disk_hits: self.disk_hits(),
            disk_misses: self.disk_misses(),
            origin_fetches: self.origin_fetches(),
            origin_failures: self.origin_failures(),
            coalesced_fetches: self.coalesced_fetches(),
            memory_evictions: tiers
                .evictions
                .saturating_sub(self.eviction_baseline.load(Ordering::Relaxed)),
            memory_resident_bytes: tiers.memory_resident_bytes,
            memory_capacity_bytes: tiers.memory_capacity_bytes,
            memory_entries: tiers.memory_entries,
            disk_resident_bytes: tiers.disk_resident_bytes,
            captured_at: Utc::now(),
        }
    }

    /// Reset all counters.
    ///
    /// `tier_evictions` is the memory tier's current lifetime eviction count,
    /// which becomes the new zero point.
    pub fn reset(&self, tier_evictions: u64) {
        self.memory_hits.store(0, Ordering::Relaxed);
        self.memory_misses.store(0, Ordering::Relaxed);
        self.disk_hits.store(0, Ordering::Relaxed);
        self.disk_misses.store(0, Ordering::Relaxed);
        self.origin_fetches.store(0, Ordering::Relaxed);
        self.origin_failures.store(0, Ordering::Relaxed);
        self.coalesced_fetches.store(0, Ordering::Relaxed);
        self.eviction_baseline
            .store(tier_evictions, Ordering::Relaxed);
    }
}

/// Point-in-time tier readings folded into a snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct TierGauges {
    pub evictions: u64,
    pub memory_resident_bytes: u64,
    pub memory_capacity_bytes: u64,
    pub memory_entries: u64,
    pub disk_resident_bytes: u64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub origin_fetches: u64,
    pub origin_failures: u64,
    pub coalesced_fetches: u64,
    pub memory_evictions: u64,
    pub memory_resident_bytes: u64,
    pub memory_capacity_bytes: u64,
    pub memory_entries: u64,
    pub disk_resident_bytes: u64,
    pub captured_at: DateTime<Utc>,
}

impl CacheStats {
    /// Memory hits / (memory hits + memory misses); 0.0 before any lookup
    pub fn memory_hit_rate(&self) -> f64 {
        ratio(self.memory_hits, self.memory_misses)
    }

    /// Disk hits / (disk hits + disk misses); 0.0 before any disk lookup
    pub fn disk_hit_rate(&self) -> f64 {
        ratio(self.disk_hits, self.disk_misses)
    }

    /// Lookups served without contacting origin
    pub fn overall_hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        ratio(hits, self.disk_misses)
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// =============================================================================
// Prometheus Exposition
// =============================================================================

/// Render a snapshot in the Prometheus text exposition format.
///
/// A private registry is built per call, so the output carries exactly the
/// metrics of this snapshot.
pub fn encode_prometheus(stats: &CacheStats) -> Result<String> {
    let registry = Registry::new_custom(Some("blobtier".to_string()), None)?;

    let counters = [
        ("memory_hits_total", "Lookups served from the memory tier", stats.memory_hits),
        ("memory_misses_total", "Lookups not found in the memory tier", stats.memory_misses),
        ("disk_hits_total", "Lookups served from the disk tier", stats.disk_hits),
        ("disk_misses_total", "Lookups not found in the disk tier", stats.disk_misses),
        ("origin_fetches_total", "Origin fetches started", stats.origin_fetches),
        ("origin_failures_total", "Origin fetches that failed", stats.origin_failures),
        (
            "coalesced_fetches_total",
            "Lookups that joined an in-flight origin fetch",
            stats.coalesced_fetches,
        ),
        ("memory_evictions_total", "Entries evicted from the memory tier", stats.memory_evictions),
    ];
    for (name, help, value) in counters {
        let counter = IntCounter::new(name, help)?;
        counter.inc_by(value);
        registry.register(Box::new(counter))?;
    }

    let gauges = [
        ("memory_resident_bytes", "Bytes resident in the memory tier", stats.memory_resident_bytes),
        ("memory_capacity_bytes", "Memory tier capacity", stats.memory_capacity_bytes),
        ("memory_entries", "Entries resident in the memory tier", stats.memory_entries),
        ("disk_resident_bytes", "Bytes resident in the disk tier", stats.disk_resident_bytes),
    ];
    for (name, help, value) in gauges {
        let gauge = IntGauge::new(name, help)?;
        gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
        registry.register(Box::new(gauge))?;
    }

    let hit_rate = Gauge::new("memory_hit_ratio", "Memory tier hit ratio")?;
    hit_rate.set(stats.memory_hit_rate());
    registry.register(Box::new(hit_rate))?;

    let disk_rate = Gauge::new("disk_hit_ratio", "Disk tier hit ratio")?;
    disk_rate.set(stats.disk_hit_rate());
    registry.register(Box::new(disk_rate))?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| Error::Internal(format!("Prometheus output is not UTF-8: {}", e)))
}

// =============================================================================
// Tests
// =============================================================================
