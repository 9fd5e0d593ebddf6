//! Property-Based Tests for the Cache
//!
//! # Test Properties
//!
//! 1. **Key Determinism**: digest(id) == digest(id), always 64 lowercase hex
//! 2. **Capacity**: the memory tier never exceeds its budget
//! 3. **Accounting**: resident size equals the sum of resident entries
//! 4. **Sampling**: the chosen factor is the largest power of two that still
//!    covers the target

#![cfg(test)]

use bytes::Bytes;
use proptest::prelude::*;

use super::decode::sample_factor;
use super::entry::{DecodedPayload, Dimensions};
use super::key::{CacheKey, KEY_LEN};
use super::memory::MemoryTier;

// =============================================================================
// Property Strategies
// =============================================================================

/// Sequence of (key index, entry size) puts over a small key space
fn put_sequence_strategy() -> impl Strategy<Value = Vec<(u8, u64)>> {
    prop::collection::vec((0u8..32, 1u64..64), 1..200)
}

fn dimensions_strategy() -> impl Strategy<Value = Dimensions> {
    (0u32..20_000, 0u32..20_000).prop_map(|(w, h)| Dimensions::new(w, h))
}

// =============================================================================
// Key Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: the same identifier always maps to the same filesystem-safe key.
    #[test]
    fn prop_digest_deterministic_and_safe(identifier in ".*") {
        let a = CacheKey::digest(&identifier);
        let b = CacheKey::digest(&identifier);

        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.as_str().len(), KEY_LEN);
        prop_assert!(CacheKey::parse(a.as_str()).is_some());
    }

    /// Property: distinct identifiers get distinct keys.
    #[test]
    fn prop_digest_distinguishes(a in ".{0,64}", b in ".{0,64}") {
        prop_assume!(a != b);
        prop_assert_ne!(CacheKey::digest(&a), CacheKey::digest(&b));
    }
}

// =============================================================================
// Memory Tier Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: after any sequence of puts, resident size <= capacity.
    #[test]
    fn prop_memory_capacity_invariant(
        capacity in 1u64..256,
        puts in put_sequence_strategy(),
    ) {
        let tier = MemoryTier::new(capacity);

        for (idx, size) in puts {
            let key = CacheKey::digest(&idx.to_string());
            let payload = DecodedPayload::new(Bytes::from(vec![idx; size as usize]));
            let stored = tier.put(key.clone(), payload, size);

            prop_assert_eq!(stored, size <= capacity);
            prop_assert_eq!(tier.contains(&key), stored);
            prop_assert!(tier.current_size_bytes() <= capacity);
        }
    }

    /// Property: resident size is the sum of the sizes of resident entries.
    #[test]
    fn prop_memory_size_accounting(puts in put_sequence_strategy()) {
        let tier = MemoryTier::new(512);
        let mut sizes = std::collections::HashMap::new();

        for (idx, size) in puts {
            let key = CacheKey::digest(&idx.to_string());
            tier.put(key.clone(), DecodedPayload::new(Bytes::new()), size);
            sizes.insert(key, size);
        }

        let expected: u64 = tier
            .keys_by_recency()
            .iter()
            .map(|key| sizes[key])
            .sum();
        prop_assert_eq!(tier.current_size_bytes(), expected);
    }

    /// Property: the most recently inserted key is never the one evicted.
    #[test]
    fn prop_memory_latest_put_survives(puts in put_sequence_strategy()) {
        let tier = MemoryTier::new(128);

        for (idx, size) in puts {
            let key = CacheKey::digest(&idx.to_string());
            tier.put(key.clone(), DecodedPayload::new(Bytes::new()), size);
            let order = tier.keys_by_recency();
            prop_assert_eq!(order.last(), Some(&key));
        }
    }
}

// =============================================================================
// Sampling Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Property: k is a power of two, covers the target, and 2k would not.
    #[test]
    fn prop_sample_factor_is_largest_covering_power(
        natural in dimensions_strategy(),
        target in dimensions_strategy(),
    ) {
        let k = sample_factor(natural, target);
        prop_assert!(k.is_power_of_two());

        if target.width == 0 || target.height == 0 {
            prop_assert_eq!(k, 1);
        } else if k > 1 {
            prop_assert!(natural.width / k >= target.width);
            prop_assert!(natural.height / k >= target.height);
        }

        let next = k * 2;
        if target.width > 0 && target.height > 0 {
            prop_assert!(natural.width / next < target.width || natural.height / next < target.height);
        }
    }
}
