//! Typed public API over the tiered cache
//!
//! `StrataCache<V>` stores any serde value under string keys; payloads
//! are serialized once at the boundary and every tier below works on
//! opaque bytes. Handles are cheap to clone and share one manager.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::cache::config::CacheConfig;
use crate::cache::entry::{CachePolicy, Priority};
use crate::cache::eviction::EvictionPolicyType;
use crate::cache::manager::{CacheManager, OptimizeReport, PreloadReport};
use crate::cache::tier::RemoteStore;
use crate::cache::traits::{CacheOperationError, HealthStatus, ManagerState, PressureLevel};
use crate::cache::transform::Encryptor;
use crate::telemetry::CacheStatistics;

pub struct StrataCache<V> {
    manager: Arc<CacheManager>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for StrataCache<V> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            _value: PhantomData,
        }
    }
}

impl<V> std::fmt::Debug for StrataCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrataCache")
            .field("state", &self.manager.state())
            .finish()
    }
}

impl<V> StrataCache<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn builder() -> StrataCacheBuilder<V> {
        StrataCacheBuilder::new()
    }

    /// Store a value under the default policy
    pub fn put(&self, key: &str, value: &V) -> Result<(), CacheOperationError> {
        self.put_with_policy(key, value, &CachePolicy::default())
    }

    /// Store a value with an explicit per-store policy
    pub fn put_with_policy(
        &self,
        key: &str,
        value: &V,
        policy: &CachePolicy,
    ) -> Result<(), CacheOperationError> {
        let raw = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| CacheOperationError::serialization_failed(e.to_string()))?;
        self.manager.store_raw(key, &raw, policy)
    }

    /// Fetch a value, probing memory, then disk, then cloud
    pub fn get(&self, key: &str) -> Result<Option<V>, CacheOperationError> {
        let Some(raw) = self.manager.retrieve_raw(key)? else {
            return Ok(None);
        };
        let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| CacheOperationError::deserialization_failed(e.to_string()))?;
        Ok(Some(value))
    }

    /// Whether a live copy exists in a local tier
    pub fn contains_key(&self, key: &str) -> bool {
        self.manager.contains(key)
    }

    /// Remove a key from every tier
    pub fn remove(&self, key: &str) -> Result<bool, CacheOperationError> {
        self.manager.remove(key)
    }

    /// Remove every entry stored with the given tag
    pub fn remove_by_tag(&self, tag: &str) -> Result<usize, CacheOperationError> {
        self.manager.remove_by_tag(tag)
    }

    /// Drop every entry and reset statistics
    pub fn clear(&self) -> Result<(), CacheOperationError> {
        self.manager.clear()
    }

    /// Warm the memory tier from the slower tiers
    pub fn preload(
        &self,
        keys: &[String],
        priority: Priority,
    ) -> Result<PreloadReport, CacheOperationError> {
        self.manager.preload(keys, priority)
    }

    /// Run one optimization pass; `None` when one is already running
    pub fn optimize(&self) -> Result<Option<OptimizeReport>, CacheOperationError> {
        self.manager.optimize()
    }

    /// Feed a host memory-pressure signal into eviction
    pub fn report_pressure(&self, level: PressureLevel) -> usize {
        self.manager.report_pressure(level)
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.manager.statistics()
    }

    pub fn health_status(&self) -> HealthStatus {
        self.manager.health_status()
    }

    pub fn state(&self) -> ManagerState {
        self.manager.state()
    }

    /// Stop background work and flush the disk tier; the cache stops
    /// serving afterwards
    pub fn shutdown_gracefully(&self) {
        self.manager.shutdown_gracefully()
    }
}

/// Fluent builder for [`StrataCache`]
pub struct StrataCacheBuilder<V> {
    config: CacheConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    encryptor: Option<Arc<dyn Encryptor>>,
    /// First setter-level mistake, reported by `build`
    invalid: Option<String>,
    _value: PhantomData<fn() -> V>,
}

impl<V> StrataCacheBuilder<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            remote: None,
            encryptor: None,
            invalid: None,
            _value: PhantomData,
        }
    }

    /// Start from a full configuration instead of the defaults
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_id<S: Into<String>>(mut self, id: S) -> Self {
        self.config.cache_id = id.into();
        self
    }

    pub fn memory_max_bytes(mut self, max_bytes: u64) -> Self {
        self.config.memory_tier.max_bytes = max_bytes;
        self
    }

    pub fn memory_max_entries(mut self, max_entries: usize) -> Self {
        self.config.memory_tier.max_entries = max_entries;
        self
    }

    pub fn disk_enabled(mut self, enabled: bool) -> Self {
        self.config.disk_tier.enabled = enabled;
        self
    }

    pub fn disk_base_dir<P: AsRef<str>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        match arrayvec::ArrayString::from(path) {
            Ok(dir) => self.config.disk_tier.base_dir = dir,
            Err(_) => {
                self.invalid = Some(format!(
                    "disk base dir is {} bytes, the limit is {}",
                    path.len(),
                    self.config.disk_tier.base_dir.capacity()
                ));
            }
        }
        self
    }

    pub fn disk_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.config.disk_tier.max_size_bytes = max_size_bytes;
        self
    }

    pub fn compression_threshold(mut self, threshold: u64) -> Self {
        self.config.transform.compression_threshold = threshold;
        self
    }

    pub fn compression_level(mut self, level: u8) -> Self {
        self.config.transform.compression_level = level;
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicyType) -> Self {
        self.config.eviction.policy = policy;
        self
    }

    pub fn sweep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.eviction.sweep_interval_ms = interval_ms;
        self
    }

    pub fn cloud_op_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.cloud_tier.op_timeout_ms = timeout_ms;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Attach a remote store as the cloud tier
    pub fn remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(store);
        self
    }

    /// Attach the cipher used when a policy requires encryption
    pub fn encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Validate the configuration, open the tiers and start the cache
    pub fn build(self) -> Result<StrataCache<V>, CacheOperationError> {
        if let Some(reason) = self.invalid {
            return Err(CacheOperationError::configuration_error(reason));
        }
        let manager = CacheManager::new(self.config, self.remote, self.encryptor)?;
        Ok(StrataCache {
            manager: Arc::new(manager),
            _value: PhantomData,
        })
    }
}

impl<V> Default for StrataCacheBuilder<V>
where
    V: Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        hits: u32,
    }

    fn cache(dir: &TempDir) -> StrataCache<Session> {
        StrataCache::builder()
            .cache_id("facade-test")
            .disk_base_dir(dir.path().to_string_lossy())
            .sweep_interval_ms(60_000)
            .build()
            .expect("build")
    }

    #[test]
    fn typed_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache(&dir);
        let session = Session {
            user: "ada".to_string(),
            hits: 3,
        };
        cache.put("s:1", &session).expect("put");
        assert_eq!(cache.get("s:1").expect("get"), Some(session));
        assert_eq!(cache.get("s:2").expect("get"), None);
    }

    #[test]
    fn clones_share_one_cache() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache(&dir);
        let other = cache.clone();
        let session = Session {
            user: "grace".to_string(),
            hits: 1,
        };
        other.put("s:1", &session).expect("put");
        assert!(cache.contains_key("s:1"));
        cache.remove("s:1").expect("remove");
        assert!(!other.contains_key("s:1"));
    }

    #[test]
    fn overlong_disk_base_dir_is_rejected_at_build() {
        let long_path = "d".repeat(300);
        let err = StrataCache::<Session>::builder()
            .cache_id("overflow")
            .disk_base_dir(&long_path)
            .build()
            .unwrap_err();
        assert!(matches!(err, CacheOperationError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("300"));
    }

    #[test]
    fn builder_applies_settings() {
        let dir = TempDir::new().expect("tempdir");
        let cache: StrataCache<Session> = StrataCache::builder()
            .cache_id("tuned")
            .disk_base_dir(dir.path().to_string_lossy())
            .memory_max_bytes(1024)
            .memory_max_entries(4)
            .eviction_policy(EvictionPolicyType::Lru)
            .sweep_interval_ms(60_000)
            .build()
            .expect("build");
        assert_eq!(cache.state(), ManagerState::Ready);
        let stats = cache.statistics();
        assert_eq!(stats.total_operations, 0);
    }
}
