//! Capacity and Retention Policies
//!
//! How big the memory tier may grow, and when disk entries are trimmed.

use std::time::Duration;

use sysinfo::System;
use tracing::debug;

use super::{DEFAULT_DISK_BUDGET, DEFAULT_MAX_ENTRY_AGE, DEFAULT_MEMORY_BUDGET};

/// Memory tier budget
///
/// The effective capacity is `min(configured, fraction * available)` so a
/// misconfigured budget cannot exhaust the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    /// Configured budget in bytes
    pub configured_bytes: u64,
    /// Upper bound as a fraction of available host memory (0.0, 1.0]
    pub max_fraction: f64,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            configured_bytes: DEFAULT_MEMORY_BUDGET,
            max_fraction: 0.25,
        }
    }
}

impl MemoryBudget {
    /// Resolve against the memory currently available on this host
    pub fn resolve(&self) -> u64 {
        let mut sys = System::new();
        sys.refresh_memory();
        let available = sys.available_memory();
        let resolved = self.resolve_with(available);
        debug!(
            configured = self.configured_bytes,
            available, resolved, "Resolved memory tier budget"
        );
        resolved
    }

    /// Resolve against an explicit amount of available memory.
    ///
    /// An `available` of 0 means the probe failed; the configured budget is
    /// then used as-is.
    pub fn resolve_with(&self, available: u64) -> u64 {
        if available == 0 {
            return self.configured_bytes;
        }
        let cap = (available as f64 * self.max_fraction.clamp(0.0, 1.0)) as u64;
        self.configured_bytes.min(cap)
    }
}

/// Disk tier retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Entries last written longer ago than this are trimmed
    pub max_age: Duration,
    /// Total resident bytes allowed after trimming
    pub max_total_bytes: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_ENTRY_AGE,
            max_total_bytes: DEFAULT_DISK_BUDGET,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
