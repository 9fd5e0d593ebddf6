//! Cache Keys
//!
//! Content-addressed keys derived from source identifiers (usually URLs).
//!
//! A key is the lowercase hex SHA-256 digest of the identifier. The mapping is
//! one-way: identifiers are never stored in plaintext, and the key doubles as
//! the on-disk file name, so it must never contain path separators.

use std::fmt;

use sha2::{Digest, Sha256};

/// Length of a hex-encoded key (SHA-256 = 32 bytes = 64 hex chars)
pub const KEY_LEN: usize = 64;

/// Fixed-length cache key
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a source identifier
    pub fn digest(identifier: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Interpret a file name as a key.
    ///
    /// Returns `None` for anything that is not exactly [`KEY_LEN`] lowercase
    /// hex characters (temp files, foreign files).
    pub fn parse(name: &str) -> Option<Self> {
        let valid = name.len() == KEY_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(name.to_string()))
    }

    /// Key as a string slice (also the disk file name)
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    #[inline]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.short())
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_digest_is_deterministic() {
        let a = CacheKey::digest("https://cdn.example.com/avatars/42.jpg");
        let b = CacheKey::digest("https://cdn.example.com/avatars/42.jpg");
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_known_value() {
        // SHA-256("") is a fixed constant, so keys survive restarts
        let key = CacheKey::digest("");
        assert_eq!(
            key.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_charset() {
        let key = CacheKey::digest("https://example.com/a/b/../c?x=1&y=/etc/passwd");
        assert_eq!(key.as_str().len(), KEY_LEN);
        assert!(!key.as_str().contains('/'));
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_distinct_identifiers_distinct_keys() {
        let keys: HashSet<CacheKey> = (0..10_000)
            .map(|i| CacheKey::digest(&format!("https://example.com/img/{}.png", i)))
            .collect();
        assert_eq!(keys.len(), 10_000);
    }

    #[test]
    fn test_parse_accepts_keys_only() {
        let key = CacheKey::digest("photo");
        assert_eq!(CacheKey::parse(key.as_str()), Some(key.clone()));

        assert!(CacheKey::parse("not-a-key").is_none());
        assert!(CacheKey::parse(&format!("{}.tmp", key)).is_none());
        assert!(CacheKey::parse(&key.as_str().to_uppercase()).is_none());
    }

    #[test]
    fn test_debug_is_short() {
        let key = CacheKey::digest("photo");
        let debug = format!("{:?}", key);
        assert!(debug.starts_with("CacheKey("));
        assert!(debug.len() < KEY_LEN);
    }
}
