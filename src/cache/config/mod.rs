//! Cache configuration: schema, validation and file loading

pub mod types;

use std::path::Path;

pub use types::{
    CacheConfig, CloudTierConfig, ConfigError, DiskTierConfig, EvictionConfig, MemoryTierConfig,
    MonitoringConfig, PromotionConfig, TransformConfig, generate_storage_path,
};

impl CacheConfig {
    /// Validate the full configuration before any tier is constructed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_id.is_empty() {
            return Err(ConfigError::MissingRequiredField("cache_id".to_string()));
        }
        if self.memory_tier.max_bytes == 0 || self.memory_tier.max_entries == 0 {
            return Err(ConfigError::MemoryTierInvalid);
        }
        if self.disk_tier.enabled {
            if self.disk_tier.base_dir.is_empty() {
                return Err(ConfigError::DiskTierPathRequired);
            }
            if self.disk_tier.max_size_bytes == 0 {
                return Err(ConfigError::InvalidValue(
                    "disk_tier.max_size_bytes must be non-zero".to_string(),
                ));
            }
            let ratio = self.disk_tier.compaction_dead_ratio;
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(ConfigError::CompactionRatioInvalid);
            }
        }
        if self.transform.compression_level > 9 {
            return Err(ConfigError::CompressionLevelInvalid);
        }
        if self.cloud_tier.op_timeout_ms == 0 {
            return Err(ConfigError::TimeoutInvalid);
        }
        if self.eviction.sweep_interval_ms == 0 {
            return Err(ConfigError::SweepIntervalInvalid);
        }
        let fraction = self.eviction.critical_reduce_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::ValidationError(
                "eviction.critical_reduce_fraction must be within (0, 1]".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a TOML or JSON file, selected by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: CacheConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParseError(e.to_string()))?,
            Some("json") => serde_json::from_str(&contents)
                .map_err(|e| ConfigError::JsonParseError(e.to_string()))?,
            other => {
                return Err(ConfigError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ));
            }
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.cache_id.is_empty());
        assert!(!config.disk_tier.base_dir.is_empty());
    }

    #[test]
    fn zero_memory_budget_rejected() {
        let mut config = CacheConfig::default();
        config.memory_tier.max_bytes = 0;
        assert_eq!(config.validate(), Err(ConfigError::MemoryTierInvalid));
    }

    #[test]
    fn compaction_ratio_bounds_enforced() {
        let mut config = CacheConfig::default();
        config.disk_tier.compaction_dead_ratio = 1.0;
        assert_eq!(config.validate(), Err(ConfigError::CompactionRatioInvalid));
        config.disk_tier.compaction_dead_ratio = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::CompactionRatioInvalid));
    }

    #[test]
    fn disabled_disk_skips_path_check() {
        let mut config = CacheConfig::default();
        config.disk_tier.enabled = false;
        config.disk_tier.base_dir.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = CacheConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: CacheConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.cache_id, config.cache_id);
        assert_eq!(parsed.memory_tier.max_bytes, config.memory_tier.max_bytes);
        assert_eq!(
            parsed.disk_tier.base_dir.as_str(),
            config.disk_tier.base_dir.as_str()
        );
    }
}
