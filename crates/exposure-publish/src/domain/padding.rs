//! Response padding.
//!
//! Every response leaving the publish surface carries a random-length filler
//! so that an observer cannot tell success, failure, chaff and maintenance
//! replies apart by size. Filler bytes are random and travel as base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::error;

use crate::middleware::metrics::{DeferredMetrics, PublishMetric};

/// Errors that can occur while generating padding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaddingError {
    /// The random source could not produce bytes.
    #[error("random source failed: {0}")]
    RandomSource(String),
}

/// Opaque filler. Length is the number of random bytes before encoding.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Padding(Vec<u8>);

impl Padding {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Padding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Padding({} bytes)", self.0.len())
    }
}

impl Serialize for Padding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Padding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.as_bytes())
            .map(Padding)
            .map_err(serde::de::Error::custom)
    }
}

/// Generate padding from the operating system's random source.
///
/// The length is uniform in `[min_bytes, min_bytes + range_bytes)`; a zero
/// range always yields exactly `min_bytes`.
pub fn generate_padding(min_bytes: usize, range_bytes: usize) -> Result<Padding, PaddingError> {
    generate_padding_with(&mut OsRng, min_bytes, range_bytes)
}

/// Generate padding from a caller-supplied random source.
pub fn generate_padding_with<R>(
    rng: &mut R,
    min_bytes: usize,
    range_bytes: usize,
) -> Result<Padding, PaddingError>
where
    R: RngCore + ?Sized,
{
    let extra = if range_bytes == 0 {
        0
    } else {
        let mut seed = [0u8; 8];
        rng.try_fill_bytes(&mut seed)
            .map_err(|e| PaddingError::RandomSource(e.to_string()))?;
        // Modulo bias is below 2^-40 for any range that fits in memory.
        (u64::from_le_bytes(seed) % range_bytes as u64) as usize
    };

    let mut filler = vec![0u8; min_bytes + extra];
    if !filler.is_empty() {
        rng.try_fill_bytes(&mut filler)
            .map_err(|e| PaddingError::RandomSource(e.to_string()))?;
    }
    Ok(Padding(filler))
}

/// Padding policy shared by every response path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePadder {
    min_bytes: usize,
    range_bytes: usize,
}

impl ResponsePadder {
    pub fn new(min_bytes: usize, range_bytes: usize) -> Self {
        Self {
            min_bytes,
            range_bytes,
        }
    }

    /// Produce padding for one response.
    ///
    /// Fails open: on a random-source failure the error is logged, the
    /// failure counter is scheduled and `None` is returned so the padding
    /// field is omitted.
    pub fn pad(&self, metrics: &mut DeferredMetrics) -> Option<Padding> {
        self.pad_with(&mut OsRng, metrics)
    }

    pub fn pad_with<R>(&self, rng: &mut R, metrics: &mut DeferredMetrics) -> Option<Padding>
    where
        R: RngCore + ?Sized,
    {
        match generate_padding_with(rng, self.min_bytes, self.range_bytes) {
            Ok(padding) => Some(padding),
            Err(e) => {
                error!(error = %e, "failed to pad response");
                metrics.inc(PublishMetric::PaddingFailed);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::metrics::PublishMetrics;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    /// Random source that always fails.
    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, _dest: &mut [u8]) {}
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy exhausted",
            )))
        }
    }

    #[test]
    fn test_zero_zero_is_empty() {
        let padding = generate_padding(0, 0).unwrap();
        assert!(padding.is_empty());
        assert_eq!(serde_json::to_string(&padding).unwrap(), "\"\"");
    }

    #[test]
    fn test_zero_range_is_exact() {
        for _ in 0..20 {
            assert_eq!(generate_padding(37, 0).unwrap().len(), 37);
        }
    }

    #[test]
    fn test_lengths_vary() {
        let mut rng = StdRng::seed_from_u64(7);
        let lengths: std::collections::HashSet<usize> = (0..50)
            .map(|_| generate_padding_with(&mut rng, 100, 100).unwrap().len())
            .collect();
        assert!(lengths.len() > 1);
    }

    #[test]
    fn test_broken_rng_is_error() {
        let result = generate_padding_with(&mut BrokenRng, 10, 10);
        assert!(matches!(result, Err(PaddingError::RandomSource(_))));
    }

    #[test]
    fn test_padder_fails_open_and_counts() {
        let sink = Arc::new(PublishMetrics::new());
        let mut deferred = DeferredMetrics::new(sink.clone());
        let padder = ResponsePadder::new(16, 16);

        assert!(padder.pad_with(&mut BrokenRng, &mut deferred).is_none());
        assert_eq!(sink.get(PublishMetric::PaddingFailed), 0);

        deferred.emit();
        assert_eq!(sink.get(PublishMetric::PaddingFailed), 1);
    }

    #[test]
    fn test_serde_roundtrip() {
        let padding = generate_padding(24, 8).unwrap();
        let json = serde_json::to_string(&padding).unwrap();
        let back: Padding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, padding);
    }

    proptest! {
        #[test]
        fn prop_length_within_bounds(min in 0usize..2048, range in 0usize..2048, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let len = generate_padding_with(&mut rng, min, range).unwrap().len();
            if range == 0 {
                prop_assert_eq!(len, min);
            } else {
                prop_assert!(len >= min && len < min + range);
            }
        }
    }
}
