//! Two-Tier Object Cache
//!
//! Bounded in-memory caching of decoded objects in front of a persisted disk
//! tier, in front of a slow origin.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           Cache Engine                               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Memory Tier (RAM)     │ Disk Tier (files)     │ Origin (network)    │
//! │  ┌──────────────────┐  │ ┌──────────────────┐  │ ┌─────────────────┐ │
//! │  │ HashMap + LRU    │  │ │ <sha256-hex>     │  │ │ ByteSource      │ │
//! │  │ decoded payloads │  │ │ encoded bytes    │  │ │ + Decoder       │ │
//! │  │ Default: 32MB    │  │ │ Default: 100MB   │  │ │ (coalesced)     │ │
//! │  └──────────────────┘  │ └──────────────────┘  │ └─────────────────┘ │
//! │         ▲              │         │  ▲          │          │          │
//! │         └── promote ───┴─────────┘  └─ store ──┴──────────┘          │
//! │                                                                      │
//! │                 Maintenance: age trim + size trim                    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Memory hits never touch I/O
//! - Disk I/O and decoding run on the blocking pool
//! - Disk failures degrade to misses
//! - One origin call per key no matter how many concurrent lookups

mod decode;
mod disk;
mod engine;
mod entry;
mod key;
mod memory;
mod metrics;
mod origin;
mod policy;
mod proptest;

use std::time::Duration;

pub use decode::{sample_factor, Decoder, ImageCodec, PassthroughDecoder, SampledDecoder};
pub use disk::{DiskTier, TrimReport};
pub use engine::{CacheEngine, CacheEngineBuilder, FetchResult, PreloadSummary, Source};
pub use entry::{DecodedPayload, Dimensions, MemoryEntry};
pub use key::{CacheKey, KEY_LEN};
pub use memory::MemoryTier;
pub use metrics::{encode_prometheus, CacheMetrics, CacheStats};
pub use origin::{
    ByteSource, FetchError, FetchTimeouts, Fetched, HttpSource, InMemorySource, OriginFetcher,
};
pub use policy::{MemoryBudget, RetentionPolicy};

/// Default memory tier budget (32MB)
pub const DEFAULT_MEMORY_BUDGET: u64 = 32 * 1024 * 1024;

/// Default disk tier budget (100MB)
pub const DEFAULT_DISK_BUDGET: u64 = 100 * 1024 * 1024;

/// Default disk entry lifetime (7 days)
pub const DEFAULT_MAX_ENTRY_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// =============================================================================
// Tests
// =============================================================================
