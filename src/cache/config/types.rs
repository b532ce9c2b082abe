//! Core configuration types and enums
//!
//! Fixed, closed configuration schema for the tiered cache: per-tier
//! capacity settings, eviction and promotion tuning, and monitoring
//! thresholds. All fields are explicit; there is no dynamic metadata
//! container.

use arrayvec::ArrayString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::cache::eviction::EvictionPolicyType;

/// Custom ArrayString serialization module
mod arraystring_serde {
    use super::*;

    pub fn serialize<S>(value: &ArrayString<256>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.as_str().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ArrayString<256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ArrayString::from(&s).map_err(serde::de::Error::custom)
    }
}

/// Memory tier (L1) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTierConfig {
    /// Byte budget the tier never exceeds
    pub max_bytes: u64,
    /// Entry-count ceiling
    pub max_entries: usize,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_entries: 100_000,
        }
    }
}

/// Disk tier (L2) configuration with persistent storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskTierConfig {
    pub enabled: bool,
    #[serde(with = "arraystring_serde")]
    pub base_dir: ArrayString<256>,
    pub max_size_bytes: u64,
    /// Dead-byte fraction of the log that triggers compaction
    pub compaction_dead_ratio: f64,
}

impl Default for DiskTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_dir: ArrayString::new(),
            max_size_bytes: 512 * 1024 * 1024,
            compaction_dead_ratio: 0.5,
        }
    }
}

/// Cloud tier (L3) configuration
///
/// The tier itself is optional; when no remote store is attached every
/// probe is a miss. `op_timeout_ms` bounds each remote call so a stalled
/// backend degrades to a miss rather than hanging retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudTierConfig {
    pub op_timeout_ms: u64,
    /// Default per-store size cap unless the policy overrides it
    pub default_size_threshold: u64,
}

impl Default for CloudTierConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: 2_000,
            default_size_threshold: 1024 * 1024,
        }
    }
}

/// Eviction tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    pub policy: EvictionPolicyType,
    /// Entries removed on a warning-level pressure signal
    pub warning_batch: usize,
    /// Entries removed on a critical-level pressure signal
    pub critical_batch: usize,
    /// Footprint fraction forcibly freed under critical pressure
    pub critical_reduce_fraction: f64,
    /// Periodic TTL sweep interval
    pub sweep_interval_ms: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicyType::Hybrid,
            warning_batch: 100,
            critical_batch: 500,
            critical_reduce_fraction: 0.5,
            sweep_interval_ms: 5_000,
        }
    }
}

/// Promotion policy tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Accesses beyond which a slow-tier hit is copied into memory
    pub access_threshold: u64,
    /// Entries larger than this never promote to memory
    pub small_object_bytes: u64,
    /// Cloud hits accessed within this window promote to disk
    pub disk_recency_window_secs: u64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            access_threshold: 3,
            small_object_bytes: 64 * 1024,
            disk_recency_window_secs: 300,
        }
    }
}

/// Transform pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Payloads at or below this size pass through uncompressed
    pub compression_threshold: u64,
    /// Deflate level (0-9); LZ4 ignores it
    pub compression_level: u8,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            compression_threshold: 512,
            compression_level: 6,
        }
    }
}

/// Health/monitoring thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Operations required before health scoring is meaningful
    pub min_samples: u64,
    /// Average latency beyond which health degrades
    pub latency_warning_ns: u64,
    /// Hit rate below which health degrades
    pub hit_rate_warning: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            min_samples: 32,
            latency_warning_ns: 5_000_000,
            hit_rate_warning: 0.5,
        }
    }
}

/// Main cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub cache_id: String,
    pub memory_tier: MemoryTierConfig,
    pub disk_tier: DiskTierConfig,
    pub cloud_tier: CloudTierConfig,
    pub eviction: EvictionConfig,
    pub promotion: PromotionConfig,
    pub transform: TransformConfig,
    pub monitoring: MonitoringConfig,
    /// Consecutive tier failures before the manager degrades
    pub failure_threshold: u32,
    pub version: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let cache_id = Uuid::new_v4().to_string();
        let mut config = Self {
            cache_id: cache_id.clone(),
            memory_tier: MemoryTierConfig::default(),
            disk_tier: DiskTierConfig::default(),
            cloud_tier: CloudTierConfig::default(),
            eviction: EvictionConfig::default(),
            promotion: PromotionConfig::default(),
            transform: TransformConfig::default(),
            monitoring: MonitoringConfig::default(),
            failure_threshold: 3,
            version: 1,
        };
        config.disk_tier.base_dir = generate_storage_path(&cache_id);
        config
    }
}

/// Default on-disk location for a cache instance
pub fn generate_storage_path(cache_id: &str) -> ArrayString<256> {
    let path = std::env::temp_dir()
        .join("stratacache")
        .join(cache_id)
        .to_string_lossy()
        .into_owned();
    ArrayString::from(path.get(..256).unwrap_or(&path)).unwrap_or_default()
}

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(String),
    ValidationError(String),
    MissingRequiredField(String),

    // File-related errors
    FileNotFound(String),
    FileReadError(String),
    TomlParseError(String),
    JsonParseError(String),
    UnsupportedFormat(String),

    // Specific validation failures
    MemoryTierInvalid,
    DiskTierPathRequired,
    CompactionRatioInvalid,
    CompressionLevelInvalid,
    TimeoutInvalid,
    SweepIntervalInvalid,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigError::ValidationError(msg) => {
                write!(f, "Configuration validation error: {}", msg)
            }
            ConfigError::MissingRequiredField(field) => {
                write!(f, "Missing required field: {}", field)
            }
            ConfigError::FileNotFound(path) => write!(f, "Configuration file not found: {}", path),
            ConfigError::FileReadError(msg) => {
                write!(f, "Failed to read configuration file: {}", msg)
            }
            ConfigError::TomlParseError(msg) => write!(f, "TOML parsing error: {}", msg),
            ConfigError::JsonParseError(msg) => write!(f, "JSON parsing error: {}", msg),
            ConfigError::UnsupportedFormat(ext) => write!(f, "Unsupported file format: {}", ext),
            ConfigError::MemoryTierInvalid => write!(f, "Memory tier configuration is invalid"),
            ConfigError::DiskTierPathRequired => write!(f, "Disk tier storage path is required"),
            ConfigError::CompactionRatioInvalid => {
                write!(f, "Compaction dead ratio must be within (0, 1)")
            }
            ConfigError::CompressionLevelInvalid => write!(f, "Compression level must be 0-9"),
            ConfigError::TimeoutInvalid => write!(f, "Timeout value is invalid"),
            ConfigError::SweepIntervalInvalid => write!(f, "Sweep interval is invalid"),
        }
    }
}

impl std::error::Error for ConfigError {}
