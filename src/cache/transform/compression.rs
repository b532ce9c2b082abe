//! Compression engine with threshold gating and atomic statistics
//!
//! Compression only applies when the input exceeds the configured
//! threshold and the compressed output is actually smaller; otherwise
//! the payload passes through untouched and the entry flag stays
//! unset. A one-byte algorithm tag is prepended to compressed payloads
//! so decompression can branch without external state.

use std::io::Write;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crossbeam_utils::atomic::AtomicCell;
use flate2::Compression as DeflateLevel;
use flate2::write::{DeflateDecoder, DeflateEncoder};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};

use crate::cache::traits::CacheOperationError;

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    Lz4,
    Deflate,
}

impl CompressionAlgorithm {
    fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::Lz4 => 0,
            CompressionAlgorithm::Deflate => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CacheOperationError> {
        match tag {
            0 => Ok(CompressionAlgorithm::Lz4),
            1 => Ok(CompressionAlgorithm::Deflate),
            other => Err(CacheOperationError::transform_failed(format!(
                "unknown compression tag {}",
                other
            ))),
        }
    }
}

/// Cumulative compression statistics, updated atomically
#[derive(Debug, Default)]
pub struct CompressionStats {
    pub attempts: AtomicU64,
    pub applied: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

impl CompressionStats {
    /// Average compressed/raw ratio over all applied compressions (1.0 when none)
    pub fn average_ratio(&self) -> f64 {
        let bytes_in = self.bytes_in.load(Ordering::Relaxed);
        if bytes_in == 0 {
            return 1.0;
        }
        self.bytes_out.load(Ordering::Relaxed) as f64 / bytes_in as f64
    }
}

/// Compression half of the transform pipeline
#[derive(Debug)]
pub struct CompressionEngine {
    algorithm: AtomicCell<CompressionAlgorithm>,
    /// Inputs at or below this size pass through
    threshold: AtomicU64,
    /// Deflate level (0-9); LZ4 ignores it
    level: AtomicU8,
    stats: CompressionStats,
}

impl CompressionEngine {
    pub fn new(threshold: u64, level: u8) -> Self {
        Self {
            algorithm: AtomicCell::new(CompressionAlgorithm::Lz4),
            threshold: AtomicU64::new(threshold),
            level: AtomicU8::new(level.min(9)),
            stats: CompressionStats::default(),
        }
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm.load()
    }

    pub fn set_algorithm(&self, algorithm: CompressionAlgorithm) {
        self.algorithm.store(algorithm);
    }

    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Adjust the passthrough threshold (used by `optimize`)
    pub fn set_threshold(&self, threshold: u64) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Compress `data` if it exceeds the threshold and shrinks; returns
    /// the payload and whether compression was applied.
    pub fn compress(&self, data: &[u8]) -> Result<(Vec<u8>, bool), CacheOperationError> {
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);

        if (data.len() as u64) <= self.threshold.load(Ordering::Relaxed) {
            return Ok((data.to_vec(), false));
        }

        let algorithm = self.algorithm.load();
        let compressed = match algorithm {
            CompressionAlgorithm::Lz4 => compress_prepend_size(data),
            CompressionAlgorithm::Deflate => {
                let level = DeflateLevel::new(self.level.load(Ordering::Relaxed) as u32);
                let mut encoder = DeflateEncoder::new(Vec::new(), level);
                encoder
                    .write_all(data)
                    .map_err(|e| CacheOperationError::transform_failed(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| CacheOperationError::transform_failed(e.to_string()))?
            }
        };

        // Tagged output must still beat the raw payload to be worth keeping
        if compressed.len() + 1 >= data.len() {
            return Ok((data.to_vec(), false));
        }

        self.stats.applied.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_in
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.stats
            .bytes_out
            .fetch_add((compressed.len() + 1) as u64, Ordering::Relaxed);

        let mut payload = Vec::with_capacity(compressed.len() + 1);
        payload.push(algorithm.tag());
        payload.extend_from_slice(&compressed);
        Ok((payload, true))
    }

    /// Reverse a payload produced by [`compress`](Self::compress) with
    /// the applied flag set.
    pub fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, CacheOperationError> {
        let (&tag, body) = payload
            .split_first()
            .ok_or_else(|| CacheOperationError::transform_failed("empty compressed payload"))?;

        match CompressionAlgorithm::from_tag(tag)? {
            CompressionAlgorithm::Lz4 => decompress_size_prepended(body)
                .map_err(|e| CacheOperationError::transform_failed(e.to_string())),
            CompressionAlgorithm::Deflate => {
                let mut decoder = DeflateDecoder::new(Vec::new());
                decoder
                    .write_all(body)
                    .map_err(|e| CacheOperationError::transform_failed(e.to_string()))?;
                decoder
                    .finish()
                    .map_err(|e| CacheOperationError::transform_failed(e.to_string()))
            }
        }
    }
}
