//! Payload Decoding
//!
//! Turns encoded bytes into a [`DecodedPayload`] no larger than the configured
//! target dimensions.
//!
//! Image formats are not handled here. A [`Decoder`] is the seam the engine
//! calls; [`SampledDecoder`] adapts any [`ImageCodec`] that can report an
//! image's bounds cheaply and decode at a power-of-two subsample.

use bytes::Bytes;
use tracing::debug;

use super::entry::{DecodedPayload, Dimensions};
use super::origin::FetchError;

/// Decodes encoded bytes. Runs on the blocking pool.
pub trait Decoder: Send + Sync + 'static {
    /// Decode `bytes`, downsampling towards `bounds` where supported
    fn decode(&self, bytes: &Bytes, bounds: Dimensions) -> Result<DecodedPayload, FetchError>;
}

/// Keeps the encoded bytes as the payload
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDecoder;

impl Decoder for PassthroughDecoder {
    fn decode(&self, bytes: &Bytes, _bounds: Dimensions) -> Result<DecodedPayload, FetchError> {
        Ok(DecodedPayload::new(bytes.clone()))
    }
}

/// An image codec capable of subsampled decoding
pub trait ImageCodec: Send + Sync + 'static {
    /// Read the natural dimensions without decoding pixel data
    fn probe(&self, bytes: &[u8]) -> Result<Dimensions, FetchError>;

    /// Decode, keeping every `sample`-th pixel on each axis
    fn decode_sampled(&self, bytes: &[u8], sample: u32) -> Result<DecodedPayload, FetchError>;
}

/// Two-pass decoder: probe bounds, then decode at the largest subsample that
/// still covers the target.
#[derive(Debug, Clone, Default)]
pub struct SampledDecoder<C> {
    codec: C,
}

impl<C: ImageCodec> SampledDecoder<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }
}

impl<C: ImageCodec> Decoder for SampledDecoder<C> {
    fn decode(&self, bytes: &Bytes, bounds: Dimensions) -> Result<DecodedPayload, FetchError> {
        let natural = self.codec.probe(bytes)?;
        let sample = sample_factor(natural, bounds);
        debug!("Decoding {} image at 1/{} for {} target", natural, sample, bounds);
        self.codec.decode_sampled(bytes, sample)
    }
}

/// Largest power of two `k` with `natural / k` still covering `target` on
/// both axes.
///
/// Returns 1 when `natural` is already within `target` or when either target
/// side is 0.
pub fn sample_factor(natural: Dimensions, target: Dimensions) -> u32 {
    if target.width == 0 || target.height == 0 || natural.fits_within(target) {
        return 1;
    }

    let mut k: u32 = 1;
    while let Some(next) = k.checked_mul(2) {
        if natural.width / next >= target.width && natural.height / next >= target.height {
            k = next;
        } else {
            break;
        }
    }
    k
}

// =============================================================================
// Tests
// =============================================================================
