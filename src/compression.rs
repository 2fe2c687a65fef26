//! Compression Codec
//!
//! Gzip compression of serialized values with a size threshold and a minimum
//! savings requirement. Keeps running totals so the cache can report how much
//! memory compression has saved.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{CacheError, Result};

// == Compressor ==
/// Byte-level algorithm behind [`CompressionCodec`].
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// The default algorithm.
#[derive(Debug, Default, Clone, Copy)]
pub struct Gzip;

impl Compressor for Gzip {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        compress(data)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        decompress(data)
    }
}

// == Compression Codec ==
pub struct CompressionCodec {
    compressor: Arc<dyn Compressor>,
    /// Payloads at or below this size are never compressed
    threshold: usize,
    /// Fraction of the raw size a compressed form must save
    min_savings: f64,
    /// Raw bytes of every payload offered above the threshold
    bytes_offered: AtomicU64,
    /// Bytes saved by accepted compressions
    bytes_saved: AtomicU64,
}

impl CompressionCodec {
    pub fn new(threshold: usize, min_savings: f64) -> Self {
        Self {
            compressor: Arc::new(Gzip),
            threshold,
            min_savings,
            bytes_offered: AtomicU64::new(0),
            bytes_saved: AtomicU64::new(0),
        }
    }

    /// Swaps the algorithm. Payloads already stored stay readable only if the
    /// new one can inflate them.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// True if a payload of `len` bytes is large enough to try.
    pub fn should_attempt(&self, len: usize) -> bool {
        len > self.threshold
    }

    // == Encode ==
    /// Compresses `raw` if it is over the threshold and compression pays off.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` when the compressed form is accepted
    /// - `Ok(None)` when the payload should be stored raw
    /// - `Err(_)` when the encoder failed; the caller stores raw
    pub fn encode(&self, raw: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.should_attempt(raw.len()) {
            return Ok(None);
        }
        self.bytes_offered
            .fetch_add(raw.len() as u64, Ordering::Relaxed);

        let compressed = self.compressor.compress(raw)?;
        let limit = raw.len() as f64 * (1.0 - self.min_savings);
        if compressed.len() as f64 > limit {
            return Ok(None);
        }

        self.bytes_saved
            .fetch_add((raw.len() - compressed.len()) as u64, Ordering::Relaxed);
        Ok(Some(compressed))
    }

    /// Bytes saved divided by bytes offered, 0.0 before any offer.
    pub fn compression_ratio(&self) -> f64 {
        let offered = self.bytes_offered.load(Ordering::Relaxed);
        if offered == 0 {
            0.0
        } else {
            self.bytes_saved.load(Ordering::Relaxed) as f64 / offered as f64
        }
    }

    pub fn bytes_saved(&self) -> u64 {
        self.bytes_saved.load(Ordering::Relaxed)
    }

    /// Inflates a payload produced by [`encode`](Self::encode).
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.compressor.decompress(data)
    }
}

impl std::fmt::Debug for CompressionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionCodec")
            .field("threshold", &self.threshold)
            .field("min_savings", &self.min_savings)
            .field("compression_ratio", &self.compression_ratio())
            .finish()
    }
}

/// Gzip-compresses a payload.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CacheError::Compression(e.to_string()))
}

/// Inflates a payload produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repetitive(len: usize) -> Vec<u8> {
        b"symbol table entry; ".iter().copied().cycle().take(len).collect()
    }

    #[test]
    fn test_below_threshold_is_not_offered() {
        let codec = CompressionCodec::new(1024, 0.2);
        let data = repetitive(1024);

        assert!(codec.encode(&data).unwrap().is_none());
        assert_eq!(codec.compression_ratio(), 0.0);
    }

    #[test]
    fn test_compressible_payload_is_accepted() {
        let codec = CompressionCodec::new(1024, 0.2);
        let data = repetitive(2000);

        let compressed = codec.encode(&data).unwrap().expect("should compress");

        assert!(compressed.len() < 1600);
        assert_eq!(codec.bytes_saved(), (2000 - compressed.len()) as u64);
        assert!(codec.compression_ratio() > 0.2);
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_insufficient_savings_keeps_raw() {
        // Nothing can save 99.99% of a 2 KB payload once the gzip header is paid
        let codec = CompressionCodec::new(16, 0.9999);
        let data = repetitive(2000);

        assert!(codec.encode(&data).unwrap().is_none());
        assert_eq!(codec.bytes_saved(), 0);
        assert_eq!(codec.compression_ratio(), 0.0);
    }

    #[test]
    fn test_ratio_accumulates_across_offers() {
        let codec = CompressionCodec::new(10, 0.2);
        let a = codec.encode(&repetitive(4000)).unwrap().unwrap();
        let b = codec.encode(&repetitive(4000)).unwrap().unwrap();

        let saved = (8000 - a.len() - b.len()) as f64;
        assert!((codec.compression_ratio() - saved / 8000.0).abs() < 1e-9);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let result = decompress(b"definitely not gzip");
        assert!(matches!(result, Err(CacheError::Compression(_))));
    }

    struct Broken;

    impl Compressor for Broken {
        fn compress(&self, _data: &[u8]) -> Result<Vec<u8>> {
            Err(CacheError::Compression("encoder unavailable".to_string()))
        }

        fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
            decompress(data)
        }
    }

    #[test]
    fn test_encoder_failure_is_returned_and_not_counted_as_savings() {
        let codec = CompressionCodec::new(16, 0.2).with_compressor(Arc::new(Broken));

        let result = codec.encode(&repetitive(2000));

        assert!(matches!(result, Err(CacheError::Compression(_))));
        assert_eq!(codec.bytes_saved(), 0);
    }

    #[test]
    fn test_decode_roundtrip() {
        let codec = CompressionCodec::new(16, 0.2);
        let data = repetitive(4000);
        let compressed = codec.encode(&data).unwrap().unwrap();
        assert_eq!(codec.decode(&compressed).unwrap(), data);
    }
}
