//! Cache Entry Types
//!
//! Decoded payloads as handed to consumers, and the bookkeeping the memory
//! tier keeps alongside each resident payload.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel dimensions of a decoded object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if both sides fit within `bounds`
    pub fn fits_within(&self, bounds: Dimensions) -> bool {
        self.width <= bounds.width && self.height <= bounds.height
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded object, ready for the consumer.
///
/// Cloning is cheap: the data is reference counted.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    data: Bytes,
    dimensions: Option<Dimensions>,
}

impl DecodedPayload {
    /// Payload without dimensions (opaque blob)
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            dimensions: None,
        }
    }

    /// Payload of a decoded image
    pub fn with_dimensions(data: Bytes, dimensions: Dimensions) -> Self {
        Self {
            data,
            dimensions: Some(dimensions),
        }
    }

    /// Decoded data (zero-copy)
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Dimensions, if the decoder reported any
    #[inline]
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    /// Bytes this payload occupies in the memory tier
    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// Consume into the underlying bytes
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for DecodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedPayload")
            .field("size", &self.data.len())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Resident memory tier entry
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Decoded payload
    pub payload: DecodedPayload,
    /// Accounted size in bytes
    pub size_bytes: u64,
    /// Recency tick; larger is more recent
    pub last_access: u64,
}

impl MemoryEntry {
    /// Create an entry stamped with `tick`
    pub fn new(payload: DecodedPayload, size_bytes: u64, tick: u64) -> Self {
        Self {
            payload,
            size_bytes,
            last_access: tick,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_size() {
        let payload = DecodedPayload::new(Bytes::from_static(b"Hello, World!"));
        assert_eq!(payload.size_bytes(), 13);
        assert_eq!(payload.dimensions(), None);
        assert_eq!(payload.data().as_ref(), b"Hello, World!");
    }

    #[test]
    fn test_payload_with_dimensions() {
        let payload =
            DecodedPayload::with_dimensions(Bytes::from(vec![0u8; 64]), Dimensions::new(4, 4));
        assert_eq!(payload.dimensions(), Some(Dimensions::new(4, 4)));
        assert_eq!(payload.into_data().len(), 64);
    }

    #[test]
    fn test_payload_clone_shares_data() {
        let payload = DecodedPayload::new(Bytes::from(vec![7u8; 1024]));
        let cloned = payload.clone();
        assert_eq!(payload.data().as_ptr(), cloned.data().as_ptr());
    }

    #[test]
    fn test_payload_debug() {
        let payload = DecodedPayload::new(Bytes::from_static(b"Test"));
        let debug = format!("{:?}", payload);
        assert!(debug.contains("DecodedPayload"));
        assert!(debug.contains("size"));
    }

    #[test]
    fn test_dimensions_fit() {
        let bounds = Dimensions::new(1080, 1920);
        assert!(Dimensions::new(1080, 1920).fits_within(bounds));
        assert!(Dimensions::new(640, 480).fits_within(bounds));
        assert!(!Dimensions::new(4000, 3000).fits_within(bounds));
        assert_eq!(Dimensions::new(640, 480).to_string(), "640x480");
    }
}
