//! blobtier - Two-Tier Binary Object Cache
//!
//! Sits between a content consumer (for example a UI rendering remote images)
//! and a slow, expensive origin. Lookups are served from a bounded in-memory
//! tier, then from a persisted disk tier, and only then from origin.
//!
//! # Architecture
//!
//! ```text
//! Consumer → CacheEngine → MemoryTier → DiskTier → OriginFetcher
//!                  ↑______________promote___|______dual-write____|
//! ```
//!
//! # Features
//!
//! - Content-addressed SHA-256 keys, safe as file names
//! - Size-aware strict LRU memory tier capped by host memory
//! - Fail-soft disk tier with atomic writes, age and size trimming
//! - Coalesced origin fetches with connect and read timeouts
//! - Power-of-two decode subsampling towards a target size
//! - Hit/miss statistics with Prometheus exposition
//!
//! # Modules
//!
//! - [`cache`] - Tiers, origin fetcher and the cache engine
//! - [`config`] - Engine configuration
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use blobtier::{CacheConfig, CacheEngine, FetchResult};
//!
//! # async fn run() -> blobtier::Result<()> {
//! let engine = CacheEngine::new(CacheConfig::with_cache_dir("/var/cache/images"))?;
//!
//! match engine.get("https://cdn.example.com/avatars/42.jpg").await {
//!     FetchResult::Success { payload, source } => {
//!         println!("{} bytes from {}", payload.size_bytes(), source);
//!     }
//!     FetchResult::Failure(e) => eprintln!("fetch failed: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheEngine, CacheKey, CacheStats, DecodedPayload, Dimensions, FetchError, FetchResult,
    PreloadSummary, Source, TrimReport,
};
pub use config::CacheConfig;
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
