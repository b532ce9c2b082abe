//! Tiered cache orchestrator
//!
//! Owns the three tiers and coordinates every operation across them:
//! writes fan out to the tiers the policy selects, retrievals probe
//! fastest-first and promote hot entries upward, and a background
//! worker sweeps expired entries on a fixed interval.
//!
//! Lifecycle runs `Initializing` to `Ready`; persistent failures in the
//! disk or cloud tier move the manager to `Degraded`, where the healthy
//! tiers keep serving. A failing tier that recovers moves it back.
//! `clear` takes the maintenance lock exclusively so no store or
//! retrieve interleaves with it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded, select, tick};
use crossbeam_utils::atomic::AtomicCell;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, CachePolicy, Priority, now_ns};
use crate::cache::eviction::EvictionManager;
use crate::cache::policy::TierSelector;
use crate::cache::tier::{CloudTier, DiskTier, EvictableTier, MemoryTier, RemoteStore};
use crate::cache::traits::{
    CacheOperationError, HealthStatus, ManagerState, PressureLevel, TierLocation,
};
use crate::cache::transform::{Encryptor, TransformPipeline};
use crate::telemetry::{CacheStatistics, PerformanceMonitor};

/// Outcome of a `preload` call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PreloadReport {
    pub requested: usize,
    /// Entries copied into the memory tier
    pub loaded: usize,
    /// Entries already resident in memory
    pub already_resident: usize,
    /// Entries found but too large for the current memory budget
    pub rejected: usize,
    /// Keys absent from every tier
    pub missing: usize,
}

/// Outcome of an `optimize` pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizeReport {
    pub expired_removed: usize,
    pub promotion_threshold_before: u64,
    pub promotion_threshold_after: u64,
    pub compression_threshold_before: u64,
    pub compression_threshold_after: u64,
    pub warning_batch_before: usize,
    pub warning_batch_after: usize,
    pub hit_rate: f64,
    pub memory_footprint: u64,
}

/// Shared state behind the public manager handle
struct ManagerCore {
    config: CacheConfig,
    state: AtomicCell<ManagerState>,
    memory: MemoryTier,
    disk: Option<DiskTier>,
    cloud: CloudTier,
    pipeline: TransformPipeline,
    selector: TierSelector,
    eviction: EvictionManager,
    monitor: PerformanceMonitor,
    /// Monotonic insertion counter, breaks LRU ties
    sequence: AtomicU64,
    /// Consecutive failures per fallible tier
    disk_failures: AtomicU32,
    cloud_failures: AtomicU32,
    /// Operations hold this shared; `clear` holds it exclusively
    maintenance_lock: RwLock<()>,
    optimize_running: AtomicBool,
}

pub struct CacheManager {
    core: Arc<ManagerCore>,
    shutdown: Sender<()>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CacheManager {
    /// Build the manager, open the tiers, and start the maintenance
    /// worker
    ///
    /// A disk tier that fails to open is not fatal: the manager starts
    /// `Degraded` and serves from the remaining tiers.
    pub fn new(
        config: CacheConfig,
        remote: Option<Arc<dyn RemoteStore>>,
        encryptor: Option<Arc<dyn Encryptor>>,
    ) -> Result<Self, CacheOperationError> {
        config
            .validate()
            .map_err(|e| CacheOperationError::configuration_error(e.to_string()))?;

        let state = AtomicCell::new(ManagerState::Initializing);
        let memory = MemoryTier::new(config.memory_tier.max_bytes, config.memory_tier.max_entries);
        let monitor = PerformanceMonitor::new(
            config.monitoring.min_samples,
            config.monitoring.latency_warning_ns,
            config.monitoring.hit_rate_warning,
        );

        let mut degraded_at_init = false;
        let disk = if config.disk_tier.enabled {
            match DiskTier::open(
                config.disk_tier.base_dir.as_str(),
                config.disk_tier.max_size_bytes,
                config.disk_tier.compaction_dead_ratio,
            ) {
                Ok(tier) => Some(tier),
                Err(e) => {
                    warn!("disk tier unavailable, starting degraded: {}", e);
                    monitor.set_tier_available(TierLocation::Disk, false);
                    degraded_at_init = true;
                    None
                }
            }
        } else {
            // Disabled by configuration, not a failure
            None
        };

        let cloud = CloudTier::new(
            remote,
            Duration::from_millis(config.cloud_tier.op_timeout_ms),
        );

        let pipeline = TransformPipeline::new(
            config.transform.compression_threshold,
            config.transform.compression_level,
            encryptor,
        );
        let selector = TierSelector::new(
            config.promotion.access_threshold,
            config.promotion.small_object_bytes,
            config.promotion.disk_recency_window_secs,
        );
        let eviction = EvictionManager::new(
            config.eviction.policy,
            config.eviction.warning_batch,
            config.eviction.critical_batch,
            config.eviction.critical_reduce_fraction,
        );

        let sweep_interval = Duration::from_millis(config.eviction.sweep_interval_ms);
        let core = Arc::new(ManagerCore {
            config,
            state,
            memory,
            disk,
            cloud,
            pipeline,
            selector,
            eviction,
            monitor,
            sequence: AtomicU64::new(0),
            disk_failures: AtomicU32::new(0),
            cloud_failures: AtomicU32::new(0),
            maintenance_lock: RwLock::new(()),
            optimize_running: AtomicBool::new(false),
        });

        core.state.store(if degraded_at_init {
            ManagerState::Degraded
        } else {
            ManagerState::Ready
        });
        info!(
            "cache manager {} ready (state {:?})",
            core.config.cache_id,
            core.state.load()
        );

        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let worker_core = Arc::clone(&core);
        let worker = thread::spawn(move || {
            let ticker = tick(sweep_interval);
            loop {
                select! {
                    recv(ticker) -> _ => worker_core.maintenance_tick(),
                    recv(shutdown_rx) -> _ => break,
                }
            }
        });

        Ok(Self {
            core,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn state(&self) -> ManagerState {
        self.core.state.load()
    }

    /// Serialize-free write: the caller provides the raw value bytes
    pub fn store_raw(
        &self,
        key: &str,
        raw: &[u8],
        policy: &CachePolicy,
    ) -> Result<(), CacheOperationError> {
        self.core.store_raw(key, raw, policy)
    }

    /// Probe tiers fastest-first and return the raw value bytes
    pub fn retrieve_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        self.core.retrieve_raw(key)
    }

    /// Whether a live copy exists in a local tier (memory or disk)
    pub fn contains(&self, key: &str) -> bool {
        self.core.contains(key)
    }

    /// Remove a key from every tier; returns whether any local tier
    /// held it
    pub fn remove(&self, key: &str) -> Result<bool, CacheOperationError> {
        self.core.remove(key)
    }

    /// Remove every entry carrying `tag` from all tiers
    pub fn remove_by_tag(&self, tag: &str) -> Result<usize, CacheOperationError> {
        self.core.remove_by_tag(tag)
    }

    /// Drop every entry from every tier and reset statistics
    pub fn clear(&self) -> Result<(), CacheOperationError> {
        self.core.clear()
    }

    /// Warm the memory tier from the slower tiers
    pub fn preload(
        &self,
        keys: &[String],
        priority: Priority,
    ) -> Result<PreloadReport, CacheOperationError> {
        self.core.preload(keys, priority)
    }

    /// Run one optimization pass; returns `None` when a pass is already
    /// running
    pub fn optimize(&self) -> Result<Option<OptimizeReport>, CacheOperationError> {
        self.core.optimize()
    }

    /// Apply a host memory-pressure signal immediately
    pub fn report_pressure(&self, level: PressureLevel) -> usize {
        self.core.report_pressure(level)
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.core.statistics()
    }

    pub fn health_status(&self) -> HealthStatus {
        self.core.health_status()
    }

    /// Stop the maintenance worker and flush the disk tier
    ///
    /// The manager stops serving afterwards; operations return
    /// `NotReady`.
    pub fn shutdown_gracefully(&self) {
        self.core.state.store(ManagerState::Initializing);
        let _ = self.shutdown.send(());
        if let Ok(mut guard) = self.worker.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
        info!("cache manager {} shut down", self.core.config.cache_id);
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Ok(mut guard) = self.worker.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
    }
}

impl ManagerCore {
    fn ensure_ready(&self) -> Result<(), CacheOperationError> {
        match self.state.load() {
            ManagerState::Ready | ManagerState::Degraded => Ok(()),
            state => Err(CacheOperationError::not_ready(format!(
                "manager state is {:?}",
                state
            ))),
        }
    }

    fn operation_guard(&self) -> Result<std::sync::RwLockReadGuard<'_, ()>, CacheOperationError> {
        self.maintenance_lock
            .read()
            .map_err(|_| self.lock_poisoned())
    }

    /// A poisoned maintenance lock means a panic inside the exclusive
    /// section left the tiers in an unknown state; the manager moves to
    /// `Error` and stops serving
    fn lock_poisoned(&self) -> CacheOperationError {
        if self.state.swap(ManagerState::Error) != ManagerState::Error {
            error!(
                "maintenance lock poisoned, cache {} entered the error state",
                self.config.cache_id
            );
        }
        CacheOperationError::concurrency_error("maintenance lock poisoned")
    }

    /// Record a tier failure; persistent failures degrade the manager
    fn note_failure(&self, location: TierLocation) {
        let counter = match location {
            TierLocation::Disk => &self.disk_failures,
            TierLocation::Cloud => &self.cloud_failures,
            TierLocation::Memory => return,
        };
        let failures = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.config.failure_threshold {
            self.monitor.set_tier_available(location, false);
            if self.state.load() == ManagerState::Ready {
                self.state.store(ManagerState::Degraded);
                warn!(
                    "{} tier failed {} consecutive operations, cache degraded",
                    location.as_str(),
                    failures
                );
            }
        }
    }

    /// Record a tier success; a recovered tier can lift degradation
    fn note_success(&self, location: TierLocation) {
        let counter = match location {
            TierLocation::Disk => &self.disk_failures,
            TierLocation::Cloud => &self.cloud_failures,
            TierLocation::Memory => return,
        };
        if counter.swap(0, Ordering::Relaxed) < self.config.failure_threshold {
            return;
        }
        self.monitor.set_tier_available(location, true);
        let threshold = self.config.failure_threshold;
        if self.disk_failures.load(Ordering::Relaxed) < threshold
            && self.cloud_failures.load(Ordering::Relaxed) < threshold
            && self.state.load() == ManagerState::Degraded
        {
            self.state.store(ManagerState::Ready);
            info!("{} tier recovered, cache ready", location.as_str());
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn store_raw(
        &self,
        key: &str,
        raw: &[u8],
        policy: &CachePolicy,
    ) -> Result<(), CacheOperationError> {
        self.ensure_ready()?;
        let _guard = self.operation_guard()?;

        if policy.targets_no_tier() {
            return Err(CacheOperationError::configuration_error(
                "policy gates off every tier",
            ));
        }

        let outcome = self.pipeline.encode(raw, policy)?;
        let entry = CacheEntry::new(
            key.to_string(),
            outcome.payload,
            raw.len() as u64,
            outcome.compressed,
            outcome.encrypted,
            policy,
            self.next_sequence(),
        );

        if policy.allow_memory {
            self.make_room_in_memory(&entry);
        }
        let targets = self.selector.store_targets(
            policy,
            entry.stored_size,
            self.memory.can_store(&entry),
            self.cloud.is_attached(),
        );
        if targets.is_empty() {
            return Err(CacheOperationError::ResourceExhausted(format!(
                "no tier can accept {} bytes for {:?}",
                entry.stored_size, key
            )));
        }

        let mut stored = false;
        let mut last_error = None;
        for target in targets {
            let started = Instant::now();
            let result = match target {
                TierLocation::Memory => self.memory.store(entry.clone()),
                TierLocation::Disk => match &self.disk {
                    Some(disk) => disk.store(entry.clone()),
                    None => continue,
                },
                TierLocation::Cloud => self.cloud.store(&entry),
            };
            match result {
                Ok(()) => {
                    stored = true;
                    self.note_success(target);
                    self.monitor
                        .record_write(target, started.elapsed().as_nanos() as u64);
                }
                Err(e) => {
                    warn!("{} tier store failed for {:?}: {}", target.as_str(), key, e);
                    // A rejected replacement must not leave the stale
                    // memory copy answering for the newer value below
                    if target == TierLocation::Memory {
                        self.memory.remove(key);
                    }
                    self.note_failure(target);
                    self.monitor.record_write_failure(target);
                    last_error = Some(e);
                }
            }
        }

        if stored {
            Ok(())
        } else {
            Err(last_error.unwrap_or_else(|| {
                CacheOperationError::ResourceExhausted(format!("no tier accepted {:?}", key))
            }))
        }
    }

    /// Evict under the active policy until the write fits in memory
    ///
    /// An entry larger than the whole budget never fits; the loop stops
    /// once the tier is drained or eviction makes no progress.
    fn make_room_in_memory(&self, entry: &CacheEntry) {
        while !self.memory.can_store(entry) {
            if self.memory.entry_count() == 0 || self.eviction.evict(&self.memory, 8) == 0 {
                break;
            }
        }
    }

    fn retrieve_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        self.ensure_ready()?;
        let _guard = self.operation_guard()?;
        let started = Instant::now();

        if let Some(entry) = self.memory.retrieve(key) {
            let raw = self.decode(&entry)?;
            self.monitor
                .record_hit(TierLocation::Memory, started.elapsed().as_nanos() as u64);
            return Ok(Some(raw));
        }
        self.monitor.record_probe_miss(TierLocation::Memory);

        if let Some(disk) = &self.disk {
            match disk.retrieve(key) {
                Ok(Some(entry)) => {
                    self.note_success(TierLocation::Disk);
                    let raw = self.decode(&entry)?;
                    self.promote_to_memory(&entry, TierLocation::Disk);
                    self.monitor
                        .record_hit(TierLocation::Disk, started.elapsed().as_nanos() as u64);
                    return Ok(Some(raw));
                }
                Ok(None) => {
                    self.note_success(TierLocation::Disk);
                    self.monitor.record_probe_miss(TierLocation::Disk);
                }
                // A failing disk leaves the slower tier a chance
                Err(e) => {
                    warn!("disk tier retrieve failed for {:?}: {}", key, e);
                    self.note_failure(TierLocation::Disk);
                    self.monitor.record_probe_miss(TierLocation::Disk);
                }
            }
        }

        match self.cloud.retrieve(key) {
            Ok(Some(mut entry)) => {
                self.note_success(TierLocation::Cloud);
                let raw = self.decode(&entry)?;
                // The recency check runs on the last access before this
                // hit; the copies stored upward carry the current one
                let recent = self.selector.should_promote_to_disk(&entry, now_ns());
                entry.last_access_ns = now_ns();
                if let Some(disk) = &self.disk
                    && recent
                {
                    match disk.store(entry.clone()) {
                        Ok(()) => {
                            self.note_success(TierLocation::Disk);
                            self.monitor.record_promotion();
                        }
                        Err(e) => {
                            warn!("promotion to disk failed for {:?}: {}", key, e);
                            self.note_failure(TierLocation::Disk);
                        }
                    }
                }
                self.promote_to_memory(&entry, TierLocation::Cloud);
                self.monitor
                    .record_hit(TierLocation::Cloud, started.elapsed().as_nanos() as u64);
                return Ok(Some(raw));
            }
            Ok(None) => {
                if self.cloud.is_attached() {
                    self.note_success(TierLocation::Cloud);
                    self.monitor.record_probe_miss(TierLocation::Cloud);
                }
            }
            Err(e) => {
                warn!("cloud tier retrieve failed for {:?}: {}", key, e);
                self.note_failure(TierLocation::Cloud);
                self.monitor.record_probe_miss(TierLocation::Cloud);
            }
        }

        self.monitor.record_miss(started.elapsed().as_nanos() as u64);
        Ok(None)
    }

    fn decode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheOperationError> {
        self.pipeline
            .decode(&entry.payload, entry.compressed, entry.encrypted)
    }

    /// Copy a slow-tier hit into memory when the promotion policy says so
    fn promote_to_memory(&self, entry: &CacheEntry, found_in: TierLocation) {
        if !self
            .selector
            .should_promote_to_memory(entry, found_in, self.memory.can_store(entry))
        {
            return;
        }
        match self.memory.store(entry.clone()) {
            Ok(()) => {
                debug!(
                    "promoted {:?} from {} tier to memory",
                    entry.key,
                    found_in.as_str()
                );
                self.monitor.record_promotion();
            }
            Err(e) => debug!("promotion to memory skipped for {:?}: {}", entry.key, e),
        }
    }

    fn contains(&self, key: &str) -> bool {
        if self.ensure_ready().is_err() {
            return false;
        }
        self.memory.contains(key)
            || self
                .disk
                .as_ref()
                .map(|disk| disk.contains(key))
                .unwrap_or(false)
    }

    fn remove(&self, key: &str) -> Result<bool, CacheOperationError> {
        self.ensure_ready()?;
        let _guard = self.operation_guard()?;
        Ok(self.remove_everywhere(key))
    }

    fn remove_everywhere(&self, key: &str) -> bool {
        let mut found = self.memory.remove(key) > 0;
        if let Some(disk) = &self.disk {
            match disk.remove(key) {
                Ok(bytes) => {
                    self.note_success(TierLocation::Disk);
                    found |= bytes > 0;
                }
                Err(e) => {
                    warn!("disk tier remove failed for {:?}: {}", key, e);
                    self.note_failure(TierLocation::Disk);
                }
            }
        }
        if self.cloud.is_attached() {
            match self.cloud.remove(key) {
                Ok(()) => self.note_success(TierLocation::Cloud),
                Err(e) => {
                    warn!("cloud tier remove failed for {:?}: {}", key, e);
                    self.note_failure(TierLocation::Cloud);
                }
            }
        }
        found
    }

    fn remove_by_tag(&self, tag: &str) -> Result<usize, CacheOperationError> {
        self.ensure_ready()?;
        let _guard = self.operation_guard()?;

        let mut keys: std::collections::BTreeSet<String> =
            self.memory.keys_with_tag(tag).into_iter().collect();
        if let Some(disk) = &self.disk {
            keys.extend(disk.keys_with_tag(tag));
        }

        let mut removed = 0usize;
        for key in &keys {
            if self.remove_everywhere(key) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("removed {} entries tagged {:?}", removed, tag);
        }
        Ok(removed)
    }

    fn clear(&self) -> Result<(), CacheOperationError> {
        self.ensure_ready()?;
        // Exclusive: no store or retrieve runs while the tiers drain
        let _guard = self
            .maintenance_lock
            .write()
            .map_err(|_| self.lock_poisoned())?;

        self.memory.clear();
        let mut first_error = None;
        if let Some(disk) = &self.disk
            && let Err(e) = disk.clear()
        {
            warn!("disk tier clear failed: {}", e);
            self.note_failure(TierLocation::Disk);
            first_error = Some(e);
        }
        if self.cloud.is_attached()
            && let Err(e) = self.cloud.clear()
        {
            warn!("cloud tier clear failed: {}", e);
            self.note_failure(TierLocation::Cloud);
            first_error.get_or_insert(e);
        }

        self.monitor.reset();
        self.eviction.reset_stats();
        info!("cache {} cleared", self.config.cache_id);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn preload(
        &self,
        keys: &[String],
        priority: Priority,
    ) -> Result<PreloadReport, CacheOperationError> {
        self.ensure_ready()?;
        let _guard = self.operation_guard()?;

        let mut report = PreloadReport {
            requested: keys.len(),
            ..PreloadReport::default()
        };
        for key in keys {
            // A shutdown mid-preload stops the warm-up early
            if self.ensure_ready().is_err() {
                break;
            }
            if self.memory.contains(key) {
                report.already_resident += 1;
                continue;
            }

            let found = match &self.disk {
                Some(disk) => match disk.retrieve(key) {
                    Ok(found) => {
                        self.note_success(TierLocation::Disk);
                        found
                    }
                    Err(e) => {
                        warn!("preload disk read failed for {:?}: {}", key, e);
                        self.note_failure(TierLocation::Disk);
                        None
                    }
                },
                None => None,
            };
            let found = match found {
                Some(entry) => Some(entry),
                None => match self.cloud.retrieve(key) {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("preload cloud read failed for {:?}: {}", key, e);
                        self.note_failure(TierLocation::Cloud);
                        None
                    }
                },
            };

            match found {
                Some(mut entry) => {
                    entry.priority = entry.priority.max(priority);
                    if self.memory.can_store(&entry) && self.memory.store(entry).is_ok() {
                        report.loaded += 1;
                    } else {
                        report.rejected += 1;
                    }
                }
                None => report.missing += 1,
            }
        }
        info!(
            "preload: {} loaded, {} resident, {} rejected, {} missing of {}",
            report.loaded,
            report.already_resident,
            report.rejected,
            report.missing,
            report.requested
        );
        Ok(report)
    }

    fn optimize(&self) -> Result<Option<OptimizeReport>, CacheOperationError> {
        self.ensure_ready()?;
        if self.optimize_running.swap(true, Ordering::AcqRel) {
            debug!("optimize already running, skipping");
            return Ok(None);
        }

        let mut expired = self.eviction.sweep_expired(&self.memory);
        if let Some(disk) = &self.disk {
            expired += self.eviction.sweep_expired(disk);
        }

        let stats = self.statistics();
        let before = self.selector.promotion_access_threshold();
        let configured = self.config.promotion.access_threshold;
        // Tune promotion aggressiveness toward the observed hit rate;
        // too few samples leaves the threshold alone
        let after = if stats.total_operations < self.config.monitoring.min_samples {
            before
        } else if stats.overall_hit_rate < self.config.monitoring.hit_rate_warning {
            before.saturating_sub(1).max(1)
        } else if before < configured {
            before + 1
        } else {
            before
        };
        if after != before {
            self.selector.set_promotion_access_threshold(after);
            info!(
                "optimize: promotion access threshold {} -> {}",
                before, after
            );
        }

        // Compression threshold follows the observed ratio: raise it when
        // applied compressions barely shrink, relax it back toward the
        // configured value when they pay off
        let compression = self.pipeline.compression();
        let compression_before = compression.threshold();
        let configured_threshold = self.config.transform.compression_threshold.max(1);
        let ratio = compression.stats().average_ratio();
        let compression_after = if ratio > 0.9 && ratio < 1.0 {
            compression_before
                .saturating_mul(2)
                .min(configured_threshold.saturating_mul(16))
        } else if ratio < 0.5 && compression_before > configured_threshold {
            (compression_before / 2).max(configured_threshold)
        } else {
            compression_before
        };
        if compression_after != compression_before {
            compression.set_threshold(compression_after);
            info!(
                "optimize: compression threshold {} -> {}",
                compression_before, compression_after
            );
        }

        // Widen the warning eviction batch while memory runs nearly full
        let warning_before = self.eviction.warning_batch();
        let budget = self.config.memory_tier.max_bytes;
        let memory_footprint = self.memory.footprint_bytes();
        let warning_after = if memory_footprint.saturating_mul(10) >= budget.saturating_mul(9) {
            (warning_before.saturating_mul(2)).min(self.config.eviction.critical_batch)
        } else {
            self.config.eviction.warning_batch
        };
        if warning_after != warning_before {
            self.eviction
                .set_batches(warning_after, self.config.eviction.critical_batch);
            info!(
                "optimize: warning eviction batch {} -> {}",
                warning_before, warning_after
            );
        }

        self.optimize_running.store(false, Ordering::Release);
        Ok(Some(OptimizeReport {
            expired_removed: expired,
            promotion_threshold_before: before,
            promotion_threshold_after: after,
            compression_threshold_before: compression_before,
            compression_threshold_after: compression_after,
            warning_batch_before: warning_before,
            warning_batch_after: warning_after,
            hit_rate: stats.overall_hit_rate,
            memory_footprint,
        }))
    }

    fn report_pressure(&self, level: PressureLevel) -> usize {
        self.monitor.set_pressure(level);
        let removed = self.eviction.handle_pressure(level, &self.memory);
        self.refresh_usage();
        removed
    }

    fn statistics(&self) -> CacheStatistics {
        self.refresh_usage();
        self.monitor.snapshot(self.eviction.snapshot())
    }

    fn health_status(&self) -> HealthStatus {
        match self.state.load() {
            ManagerState::Error => HealthStatus::Critical,
            ManagerState::Degraded => match self.monitor.health_status() {
                HealthStatus::Healthy => HealthStatus::Warning,
                worse => worse,
            },
            _ => self.monitor.health_status(),
        }
    }

    fn refresh_usage(&self) {
        let (disk_bytes, disk_entries) = match &self.disk {
            Some(disk) => (disk.footprint_bytes(), disk.entry_count() as u64),
            None => (0, 0),
        };
        self.monitor.update_memory_usage([
            (
                TierLocation::Memory,
                self.memory.footprint_bytes(),
                self.memory.entry_count() as u64,
            ),
            (TierLocation::Disk, disk_bytes, disk_entries),
            (TierLocation::Cloud, 0, 0),
        ]);
    }

    /// Periodic sweep run by the maintenance worker
    fn maintenance_tick(&self) {
        if self.ensure_ready().is_err() {
            return;
        }
        let Ok(_guard) = self.maintenance_lock.read() else {
            let _ = self.lock_poisoned();
            return;
        };
        let mut removed = self.eviction.sweep_expired(&self.memory);
        if let Some(disk) = &self.disk {
            removed += self.eviction.sweep_expired(disk);
        }
        if removed > 0 {
            debug!("maintenance sweep removed {} expired entries", removed);
        }
        self.refresh_usage();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tier::InMemoryRemoteStore;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> CacheConfig {
        let mut config = CacheConfig::default();
        config.cache_id = "test".to_string();
        config.disk_tier.base_dir =
            arrayvec::ArrayString::from(&dir.path().to_string_lossy()).unwrap();
        config.eviction.sweep_interval_ms = 60_000;
        config
    }

    fn manager(dir: &TempDir) -> CacheManager {
        CacheManager::new(test_config(dir), None, None).expect("manager")
    }

    #[test]
    fn starts_ready_and_serves() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        assert_eq!(cache.state(), ManagerState::Ready);

        let policy = CachePolicy::default();
        cache.store_raw("k", b"value", &policy).expect("store");
        assert_eq!(
            cache.retrieve_raw("k").expect("retrieve"),
            Some(b"value".to_vec())
        );
        assert!(cache.contains("k"));
    }

    #[test]
    fn shutdown_rejects_further_operations() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        cache.shutdown_gracefully();
        assert!(matches!(
            cache.store_raw("k", b"v", &CachePolicy::default()),
            Err(CacheOperationError::NotReady(_))
        ));
    }

    #[test]
    fn poisoned_maintenance_lock_is_terminal() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);

        let core = Arc::clone(&cache.core);
        let poisoner = thread::spawn(move || {
            let _guard = core.maintenance_lock.write().expect("lock");
            panic!("die while holding the maintenance lock");
        });
        assert!(poisoner.join().is_err());

        assert!(matches!(
            cache.store_raw("k", b"v", &CachePolicy::default()),
            Err(CacheOperationError::ConcurrentAccess(_))
        ));
        assert_eq!(cache.state(), ManagerState::Error);
        assert_eq!(cache.health_status(), HealthStatus::Critical);
    }

    #[test]
    fn policy_gating_off_every_tier_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        let policy = CachePolicy {
            allow_memory: false,
            persist_to_disk: false,
            distribute_to_cloud: false,
            ..CachePolicy::default()
        };
        assert!(matches!(
            cache.store_raw("k", b"v", &policy),
            Err(CacheOperationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn disk_open_failure_degrades_but_memory_serves() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = test_config(&dir);
        // A file where the tier expects a directory
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").expect("write");
        config.disk_tier.base_dir =
            arrayvec::ArrayString::from(&blocker.join("sub").to_string_lossy()).unwrap();

        let cache = CacheManager::new(config, None, None).expect("manager");
        assert_eq!(cache.state(), ManagerState::Degraded);

        cache
            .store_raw("k", b"v", &CachePolicy::default())
            .expect("memory still accepts");
        assert_eq!(cache.retrieve_raw("k").expect("hit"), Some(b"v".to_vec()));
        assert_ne!(cache.health_status(), HealthStatus::Healthy);
    }

    #[test]
    fn disk_hit_populates_after_memory_eviction() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        cache
            .store_raw("k", b"persisted", &CachePolicy::default())
            .expect("store");
        // Force the memory copy out; the disk copy must still answer
        cache.core.memory.remove("k");
        assert_eq!(
            cache.retrieve_raw("k").expect("retrieve"),
            Some(b"persisted".to_vec())
        );
        let stats = cache.statistics();
        assert_eq!(stats.disk_tier.hits, 1);
    }

    #[test]
    fn repeated_slow_tier_hits_promote_to_memory() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        cache
            .store_raw("hot", b"data", &CachePolicy::default())
            .expect("store");
        cache.core.memory.remove("hot");

        // Threshold is 3 accesses; the 4th disk hit qualifies
        for _ in 0..4 {
            assert!(cache.retrieve_raw("hot").expect("hit").is_some());
        }
        assert!(cache.core.memory.contains("hot"));
        assert!(cache.statistics().promotions_performed >= 1);

        // Promotion copies; the disk copy still answers on its own
        assert!(cache.core.disk.as_ref().expect("disk").contains("hot"));
        cache.core.memory.remove("hot");
        assert_eq!(
            cache.retrieve_raw("hot").expect("hit"),
            Some(b"data".to_vec())
        );
    }

    #[test]
    fn cloud_only_entry_promotes_to_disk() {
        let dir = TempDir::new().expect("tempdir");
        let remote = Arc::new(InMemoryRemoteStore::new());
        let cache =
            CacheManager::new(test_config(&dir), Some(remote), None).expect("manager");

        let policy = CachePolicy {
            allow_memory: false,
            persist_to_disk: false,
            distribute_to_cloud: true,
            ..CachePolicy::default()
        };
        cache.store_raw("far", b"remote", &policy).expect("store");
        assert!(!cache.contains("far"));

        // Recent access lands within the disk promotion window
        assert_eq!(
            cache.retrieve_raw("far").expect("hit"),
            Some(b"remote".to_vec())
        );
        assert!(cache.core.disk.as_ref().expect("disk").contains("far"));
    }

    #[test]
    fn stale_cloud_hits_stay_off_disk() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = test_config(&dir);
        config.promotion.disk_recency_window_secs = 1;
        let remote = Arc::new(InMemoryRemoteStore::new());
        let cache = CacheManager::new(config, Some(remote), None).expect("manager");

        let policy = CachePolicy {
            allow_memory: false,
            persist_to_disk: false,
            distribute_to_cloud: true,
            ..CachePolicy::default()
        };
        cache.store_raw("idle", b"remote", &policy).expect("store");

        // Idle past the window: the hit itself must not count as recency
        thread::sleep(Duration::from_millis(1200));
        assert_eq!(
            cache.retrieve_raw("idle").expect("hit"),
            Some(b"remote".to_vec())
        );
        assert!(!cache.core.disk.as_ref().expect("disk").contains("idle"));
    }

    #[test]
    fn remove_clears_all_tiers() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        cache
            .store_raw("k", b"v", &CachePolicy::default())
            .expect("store");
        assert!(cache.remove("k").expect("remove"));
        assert!(!cache.contains("k"));
        assert_eq!(cache.retrieve_raw("k").expect("miss"), None);
        assert!(!cache.remove("k").expect("second remove"));
    }

    #[test]
    fn remove_by_tag_sweeps_memory_and_disk() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        let tagged = CachePolicy::default().with_tag("session:42");
        cache.store_raw("a", b"1", &tagged).expect("store");
        cache.store_raw("b", b"2", &tagged).expect("store");
        cache
            .store_raw("c", b"3", &CachePolicy::default())
            .expect("store");
        // A disk-only tagged entry must be found through the disk index
        cache.core.memory.remove("b");

        assert_eq!(cache.remove_by_tag("session:42").expect("remove"), 2);
        assert!(!cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn clear_drains_tiers_and_resets_statistics() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        cache
            .store_raw("k", b"v", &CachePolicy::default())
            .expect("store");
        assert!(cache.retrieve_raw("k").expect("hit").is_some());

        cache.clear().expect("clear");
        assert!(!cache.contains("k"));
        let stats = cache.statistics();
        assert_eq!(stats.total_operations, 0);
        assert_eq!(stats.memory_tier.entry_count, 0);
    }

    #[test]
    fn preload_warms_memory_from_disk() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        cache
            .store_raw("warm", b"v", &CachePolicy::default())
            .expect("store");
        cache.core.memory.remove("warm");

        let keys = vec!["warm".to_string(), "absent".to_string()];
        let report = cache.preload(&keys, Priority::High).expect("preload");
        assert_eq!(report.requested, 2);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.missing, 1);
        assert!(cache.core.memory.contains("warm"));
    }

    #[test]
    fn optimize_reports_and_is_single_flight() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        cache
            .store_raw("k", b"v", &CachePolicy::default())
            .expect("store");

        let report = cache.optimize().expect("optimize").expect("report");
        assert_eq!(
            report.promotion_threshold_before,
            report.promotion_threshold_after
        );

        cache
            .core
            .optimize_running
            .store(true, Ordering::Release);
        assert!(cache.optimize().expect("optimize").is_none());
    }

    #[test]
    fn pressure_signal_evicts_from_memory() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = test_config(&dir);
        config.eviction.warning_batch = 5;
        let cache = CacheManager::new(config, None, None).expect("manager");

        let policy = CachePolicy::memory_only();
        for i in 0..20 {
            cache
                .store_raw(&format!("k{}", i), &[0u8; 64], &policy)
                .expect("store");
        }
        let removed = cache.report_pressure(PressureLevel::Warning);
        assert_eq!(removed, 5);
        assert_eq!(cache.statistics().memory_tier.entry_count, 15);
    }

    #[test]
    fn statistics_track_hits_and_misses() {
        let dir = TempDir::new().expect("tempdir");
        let cache = manager(&dir);
        cache
            .store_raw("k", b"v", &CachePolicy::default())
            .expect("store");
        assert!(cache.retrieve_raw("k").expect("hit").is_some());
        assert!(cache.retrieve_raw("nope").expect("miss").is_none());

        let stats = cache.statistics();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.total_misses, 1);
        assert_eq!(stats.memory_tier.hits, 1);
    }
}
