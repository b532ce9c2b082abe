//! Transform pipeline applied to serialized payloads before any tier write
//!
//! Order is fixed: compress, then encrypt. Decoding reverses the steps
//! the entry flags say were applied; flags therefore must be recorded
//! exactly, since a wrong flag either corrupts the payload or feeds
//! ciphertext to the deserializer.

pub mod compression;
pub mod encryption;

use std::sync::Arc;

pub use compression::{CompressionAlgorithm, CompressionEngine, CompressionStats};
pub use encryption::{Encryptor, KeystreamEncryptor};

use crate::cache::entry::CachePolicy;
use crate::cache::traits::CacheOperationError;

/// Result of running a payload through the pipeline
#[derive(Debug)]
pub struct TransformOutcome {
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub encrypted: bool,
}

/// Compression + encryption filters with a fixed reversibility contract
pub struct TransformPipeline {
    compression: CompressionEngine,
    encryptor: Option<Arc<dyn Encryptor>>,
}

impl TransformPipeline {
    pub fn new(
        compression_threshold: u64,
        compression_level: u8,
        encryptor: Option<Arc<dyn Encryptor>>,
    ) -> Self {
        Self {
            compression: CompressionEngine::new(compression_threshold, compression_level),
            encryptor,
        }
    }

    pub fn compression(&self) -> &CompressionEngine {
        &self.compression
    }

    pub fn has_encryptor(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Apply the transforms a policy asks for to a serialized value
    pub fn encode(
        &self,
        raw: &[u8],
        policy: &CachePolicy,
    ) -> Result<TransformOutcome, CacheOperationError> {
        let (payload, compressed) = if policy.compression_enabled {
            self.compression.compress(raw)?
        } else {
            (raw.to_vec(), false)
        };

        if !policy.encryption_required {
            return Ok(TransformOutcome {
                payload,
                compressed,
                encrypted: false,
            });
        }

        let encryptor = self.encryptor.as_ref().ok_or_else(|| {
            CacheOperationError::configuration_error(
                "policy requires encryption but no encryptor is configured",
            )
        })?;
        let payload = encryptor.encrypt(&payload)?;
        Ok(TransformOutcome {
            payload,
            compressed,
            encrypted: true,
        })
    }

    /// Reverse transforms according to the recorded entry flags
    pub fn decode(
        &self,
        payload: &[u8],
        compressed: bool,
        encrypted: bool,
    ) -> Result<Vec<u8>, CacheOperationError> {
        let payload = if encrypted {
            let encryptor = self.encryptor.as_ref().ok_or_else(|| {
                CacheOperationError::transform_failed(
                    "entry is encrypted but no encryptor is configured",
                )
            })?;
            encryptor.decrypt(payload)?
        } else {
            payload.to_vec()
        };

        if compressed {
            self.compression.decompress(&payload)
        } else {
            Ok(payload)
        }
    }
}
