//! Type definitions, enums and error handling for the cache system
//!
//! Everything here is deliberately a closed set: tiers are a fixed
//! `Memory | Disk | Cloud` variant set iterated by the orchestrator,
//! and errors are one enum with helper constructors.

use serde::{Deserialize, Serialize};

/// Tier location, fastest to slowest
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub enum TierLocation {
    Memory,
    Disk,
    Cloud,
}

impl TierLocation {
    /// Probe order for retrievals, fastest first
    pub const PROBE_ORDER: [TierLocation; 3] =
        [TierLocation::Memory, TierLocation::Disk, TierLocation::Cloud];

    /// Stable index for statistics arrays
    #[inline]
    pub fn index(self) -> usize {
        match self {
            TierLocation::Memory => 0,
            TierLocation::Disk => 1,
            TierLocation::Cloud => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TierLocation::Memory => "memory",
            TierLocation::Disk => "disk",
            TierLocation::Cloud => "cloud",
        }
    }
}

/// Orchestrator lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Initializing,
    Ready,
    /// A non-fatal tier reports persistent failures; remaining tiers keep serving
    Degraded,
    /// Terminal until re-initialized
    Error,
}

/// Host-reported memory pressure severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

/// Derived health of the whole cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Error type for all cache operations
///
/// Cache misses are never errors; they surface as `Ok(None)` or `false`
/// from the relevant operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOperationError {
    /// Operation attempted outside the `Ready`/`Degraded` states
    NotReady(String),
    SerializationError(String),
    DeserializationError(String),
    /// Tier-level storage or I/O failure
    StorageError(String),
    Io(String),
    /// Compression or encryption failure; fatal for the affected entry
    TransformError(String),
    /// Remote tier did not answer within its deadline
    TimeoutError,
    /// Invalid policy or configuration, rejected before any I/O
    InvalidConfiguration(String),
    /// Checksum or framing mismatch on stored data
    Corruption(String),
    MemoryLimitExceeded,
    ResourceExhausted(String),
    ConcurrentAccess(String),
    OperationFailed(String),
}

impl std::fmt::Display for CacheOperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheOperationError::NotReady(msg) => write!(f, "Cache not ready: {}", msg),
            CacheOperationError::SerializationError(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            CacheOperationError::DeserializationError(msg) => {
                write!(f, "Deserialization error: {}", msg)
            }
            CacheOperationError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            CacheOperationError::Io(msg) => write!(f, "I/O error: {}", msg),
            CacheOperationError::TransformError(msg) => write!(f, "Transform error: {}", msg),
            CacheOperationError::TimeoutError => write!(f, "Operation timed out"),
            CacheOperationError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
            CacheOperationError::Corruption(msg) => write!(f, "Data corruption: {}", msg),
            CacheOperationError::MemoryLimitExceeded => write!(f, "Memory limit exceeded"),
            CacheOperationError::ResourceExhausted(msg) => {
                write!(f, "Resource exhausted: {}", msg)
            }
            CacheOperationError::ConcurrentAccess(msg) => {
                write!(f, "Concurrent access error: {}", msg)
            }
            CacheOperationError::OperationFailed(msg) => write!(f, "Operation failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheOperationError {}

impl CacheOperationError {
    /// Create a not-ready error
    #[inline(always)]
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create a serialization error
    #[inline(always)]
    pub fn serialization_failed(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Create a deserialization error
    #[inline(always)]
    pub fn deserialization_failed(msg: impl Into<String>) -> Self {
        Self::DeserializationError(msg.into())
    }

    /// Create a storage error
    #[inline(always)]
    pub fn storage_failed(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }

    /// Create an I/O error
    #[inline(always)]
    pub fn io_failed(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Create a transform error
    #[inline(always)]
    pub fn transform_failed(msg: impl Into<String>) -> Self {
        Self::TransformError(msg.into())
    }

    /// Create a configuration error
    #[inline(always)]
    pub fn configuration_error(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a corruption error
    #[inline(always)]
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create a concurrency error
    #[inline(always)]
    pub fn concurrency_error(msg: impl Into<String>) -> Self {
        Self::ConcurrentAccess(msg.into())
    }

    /// Create a generic operation failure
    #[inline(always)]
    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::OperationFailed(msg.into())
    }
}

impl From<std::io::Error> for CacheOperationError {
    fn from(err: std::io::Error) -> Self {
        CacheOperationError::Io(err.to_string())
    }
}
