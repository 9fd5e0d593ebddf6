//! Memory Tier - RAM-based Hot Cache
//!
//! Bounded, size-aware, strict LRU store of decoded payloads.
//!
//! # Design
//!
//! - `HashMap` index for O(1) lookups
//! - `BTreeMap` keyed by recency tick for ordered eviction
//! - One monotonic tick serves both recency and insertion order, so ties
//!   cannot occur and older inserts always lose
//! - Capacity check, eviction and insert run under a single mutex

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use super::entry::{DecodedPayload, MemoryEntry};
use super::key::CacheKey;

#[derive(Default)]
struct LruState {
    entries: HashMap<CacheKey, MemoryEntry>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, CacheKey>,
    tick: u64,
    size: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn detach(&mut self, key: &CacheKey) -> Option<MemoryEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.last_access);
        self.size -= entry.size_bytes;
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<(CacheKey, MemoryEntry)> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.size -= entry.size_bytes;
        Some((key, entry))
    }
}

/// Memory tier
pub struct MemoryTier {
    state: Mutex<LruState>,
    /// Capacity in bytes
    capacity: u64,
    /// Eviction count
    evictions: AtomicU64,
}

impl MemoryTier {
    /// Create a memory tier with a resolved byte capacity
    pub fn new(capacity: u64) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            capacity,
            evictions: AtomicU64::new(0),
        }
    }

    /// Get a payload, bumping its recency
    pub fn get(&self, key: &CacheKey) -> Option<DecodedPayload> {
        let mut state = self.state.lock();
        let tick = state.next_tick();

        let entry = state.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut entry.last_access, tick);
        let payload = entry.payload.clone();

        state.order.remove(&previous);
        state.order.insert(tick, key.clone());
        Some(payload)
    }

    /// Insert or replace a payload.
    ///
    /// Evicts least-recently-used entries until `size_bytes` fits. Returns
    /// `false` when the payload alone exceeds the capacity; it is then not
    /// cached and any older value for `key` is dropped.
    pub fn put(&self, key: CacheKey, payload: DecodedPayload, size_bytes: u64) -> bool {
        let mut state = self.state.lock();
        state.detach(&key);

        if size_bytes > self.capacity {
            trace!(key = %key.short(), size_bytes, capacity = self.capacity, "Payload exceeds memory tier capacity");
            return false;
        }

        while state.size + size_bytes > self.capacity {
            match state.pop_oldest() {
                Some((evicted, entry)) => {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %evicted.short(), size = entry.size_bytes, "Evicted from memory tier");
                }
                None => break,
            }
        }

        let tick = state.next_tick();
        state.order.insert(tick, key.clone());
        state.size += size_bytes;
        state
            .entries
            .insert(key, MemoryEntry::new(payload, size_bytes, tick));
        true
    }

    /// Remove an entry; no-op if absent
    pub fn remove(&self, key: &CacheKey) -> Option<DecodedPayload> {
        self.state.lock().detach(key).map(|entry| entry.payload)
    }

    /// Check presence without touching recency
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Drop all entries
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        state.size = 0;
    }

    /// Keys from least to most recently used
    pub fn keys_by_recency(&self) -> Vec<CacheKey> {
        self.state.lock().order.values().cloned().collect()
    }

    /// Current size in bytes
    pub fn current_size_bytes(&self) -> u64 {
        self.state.lock().size
    }

    /// Capacity in bytes
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
