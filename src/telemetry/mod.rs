//! Performance and memory monitoring with atomic coordination
//!
//! All counters derive from genuine operation counts and are owned by
//! the monitor; tiers and the orchestrator report through its record_*
//! methods only, so nothing is double counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use crossbeam_utils::atomic::AtomicCell;
use serde::{Deserialize, Serialize};

use crate::cache::eviction::EvictionSnapshot;
use crate::cache::traits::{HealthStatus, PressureLevel, TierLocation};

/// Per-tier counters, cache-padded to avoid false sharing
#[derive(Debug, Default)]
pub struct TierStatistics {
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    writes: CachePadded<AtomicU64>,
    write_failures: CachePadded<AtomicU64>,
    total_latency_ns: CachePadded<AtomicU64>,
    bytes_stored: CachePadded<AtomicU64>,
    entry_count: CachePadded<AtomicU64>,
    available: AtomicBool,
}

/// Read-only snapshot of one tier's counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub avg_latency_ns: u64,
    pub bytes_stored: u64,
    pub entry_count: u64,
    pub available: bool,
}

/// Read-only snapshot across the whole cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_operations: u64,
    pub total_misses: u64,
    pub overall_hit_rate: f64,
    pub avg_access_latency_ns: u64,
    pub promotions_performed: u64,
    pub total_memory_usage: u64,
    pub peak_memory_usage: u64,
    pub memory_tier: TierSnapshot,
    pub disk_tier: TierSnapshot,
    pub cloud_tier: TierSnapshot,
    pub eviction: EvictionSnapshot,
}

/// Unified statistics aggregator for all tiers
#[derive(Debug)]
pub struct PerformanceMonitor {
    tiers: [TierStatistics; 3],
    total_operations: CachePadded<AtomicU64>,
    total_misses: CachePadded<AtomicU64>,
    total_latency_ns: CachePadded<AtomicU64>,
    promotions_performed: CachePadded<AtomicU64>,
    total_memory_usage: CachePadded<AtomicU64>,
    peak_memory_usage: CachePadded<AtomicU64>,
    pressure: AtomicCell<PressureLevel>,
    /// Health thresholds
    min_samples: u64,
    latency_warning_ns: u64,
    hit_rate_warning: f64,
}

impl PerformanceMonitor {
    pub fn new(min_samples: u64, latency_warning_ns: u64, hit_rate_warning: f64) -> Self {
        let monitor = Self {
            tiers: Default::default(),
            total_operations: CachePadded::new(AtomicU64::new(0)),
            total_misses: CachePadded::new(AtomicU64::new(0)),
            total_latency_ns: CachePadded::new(AtomicU64::new(0)),
            promotions_performed: CachePadded::new(AtomicU64::new(0)),
            total_memory_usage: CachePadded::new(AtomicU64::new(0)),
            peak_memory_usage: CachePadded::new(AtomicU64::new(0)),
            pressure: AtomicCell::new(PressureLevel::Normal),
            min_samples,
            latency_warning_ns,
            hit_rate_warning,
        };
        for tier in &monitor.tiers {
            tier.available.store(true, Ordering::Relaxed);
        }
        monitor
    }

    fn tier(&self, location: TierLocation) -> &TierStatistics {
        &self.tiers[location.index()]
    }

    /// Record a hit in `location`; one logical retrieve counts once
    pub fn record_hit(&self, location: TierLocation, latency_ns: u64) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
        let tier = self.tier(location);
        tier.hits.fetch_add(1, Ordering::Relaxed);
        tier.total_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }

    /// Record a probe that missed in `location` on the way to a slower
    /// tier (does not count a logical operation)
    pub fn record_probe_miss(&self, location: TierLocation) {
        self.tier(location).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a full miss across every probed tier
    pub fn record_miss(&self, latency_ns: u64) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        self.total_misses.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }

    pub fn record_write(&self, location: TierLocation, latency_ns: u64) {
        let tier = self.tier(location);
        tier.writes.fetch_add(1, Ordering::Relaxed);
        tier.total_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self, location: TierLocation) {
        self.tier(location)
            .write_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions_performed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_tier_available(&self, location: TierLocation, available: bool) {
        self.tier(location).available.store(available, Ordering::Relaxed);
    }

    pub fn set_pressure(&self, level: PressureLevel) {
        self.pressure.store(level);
    }

    pub fn pressure(&self) -> PressureLevel {
        self.pressure.load()
    }

    /// Refresh per-tier footprint gauges with CAS peak tracking
    pub fn update_memory_usage(&self, usage: [(TierLocation, u64, u64); 3]) {
        let mut total = 0u64;
        for (location, bytes, entries) in usage {
            let tier = self.tier(location);
            tier.bytes_stored.store(bytes, Ordering::Relaxed);
            tier.entry_count.store(entries, Ordering::Relaxed);
            if location == TierLocation::Memory {
                total = bytes;
            }
        }
        self.total_memory_usage.store(total, Ordering::Relaxed);

        let mut current_peak = self.peak_memory_usage.load(Ordering::Relaxed);
        while total > current_peak {
            match self.peak_memory_usage.compare_exchange_weak(
                current_peak,
                total,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }
    }

    fn tier_snapshot(&self, location: TierLocation) -> TierSnapshot {
        let tier = self.tier(location);
        let hits = tier.hits.load(Ordering::Relaxed);
        let writes = tier.writes.load(Ordering::Relaxed);
        let samples = hits + writes;
        let total_latency = tier.total_latency_ns.load(Ordering::Relaxed);
        TierSnapshot {
            hits,
            misses: tier.misses.load(Ordering::Relaxed),
            writes,
            write_failures: tier.write_failures.load(Ordering::Relaxed),
            avg_latency_ns: if samples > 0 { total_latency / samples } else { 0 },
            bytes_stored: tier.bytes_stored.load(Ordering::Relaxed),
            entry_count: tier.entry_count.load(Ordering::Relaxed),
            available: tier.available.load(Ordering::Relaxed),
        }
    }

    /// Point-in-time snapshot of every counter
    pub fn snapshot(&self, eviction: EvictionSnapshot) -> CacheStatistics {
        let total_operations = self.total_operations.load(Ordering::Relaxed);
        let total_misses = self.total_misses.load(Ordering::Relaxed);
        let hit_rate = if total_operations > 0 {
            (total_operations - total_misses) as f64 / total_operations as f64
        } else {
            0.0
        };
        CacheStatistics {
            total_operations,
            total_misses,
            overall_hit_rate: hit_rate,
            avg_access_latency_ns: if total_operations > 0 {
                self.total_latency_ns.load(Ordering::Relaxed) / total_operations
            } else {
                0
            },
            promotions_performed: self.promotions_performed.load(Ordering::Relaxed),
            total_memory_usage: self.total_memory_usage.load(Ordering::Relaxed),
            peak_memory_usage: self.peak_memory_usage.load(Ordering::Relaxed),
            memory_tier: self.tier_snapshot(TierLocation::Memory),
            disk_tier: self.tier_snapshot(TierLocation::Disk),
            cloud_tier: self.tier_snapshot(TierLocation::Cloud),
            eviction,
        }
    }

    /// Weighted health from hit rate, latency, pressure and availability
    pub fn health_status(&self) -> HealthStatus {
        let total_operations = self.total_operations.load(Ordering::Relaxed);
        let pressure = self.pressure.load();
        let unavailable = self
            .tiers
            .iter()
            .filter(|tier| !tier.available.load(Ordering::Relaxed))
            .count();

        if pressure == PressureLevel::Critical || unavailable >= 2 {
            return HealthStatus::Critical;
        }

        // Not enough samples to judge rates; availability already checked
        if total_operations < self.min_samples {
            return if unavailable > 0 || pressure == PressureLevel::Warning {
                HealthStatus::Warning
            } else {
                HealthStatus::Healthy
            };
        }

        let total_misses = self.total_misses.load(Ordering::Relaxed);
        let hit_rate = (total_operations - total_misses) as f64 / total_operations as f64;
        let avg_latency = self.total_latency_ns.load(Ordering::Relaxed) / total_operations;

        let mut score = 0u32;
        if hit_rate < self.hit_rate_warning {
            score += 2;
        }
        if avg_latency > self.latency_warning_ns {
            score += 1;
        }
        if pressure == PressureLevel::Warning {
            score += 1;
        }
        if unavailable > 0 {
            score += 1;
        }

        match score {
            0 => HealthStatus::Healthy,
            1 | 2 => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        }
    }

    /// Zero every counter (used by `clear`)
    pub fn reset(&self) {
        for tier in &self.tiers {
            tier.hits.store(0, Ordering::Relaxed);
            tier.misses.store(0, Ordering::Relaxed);
            tier.writes.store(0, Ordering::Relaxed);
            tier.write_failures.store(0, Ordering::Relaxed);
            tier.total_latency_ns.store(0, Ordering::Relaxed);
            tier.bytes_stored.store(0, Ordering::Relaxed);
            tier.entry_count.store(0, Ordering::Relaxed);
        }
        self.total_operations.store(0, Ordering::Relaxed);
        self.total_misses.store(0, Ordering::Relaxed);
        self.total_latency_ns.store(0, Ordering::Relaxed);
        self.promotions_performed.store(0, Ordering::Relaxed);
        self.total_memory_usage.store(0, Ordering::Relaxed);
        self.peak_memory_usage.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(4, 1_000_000, 0.5)
    }

    #[test]
    fn hit_rate_counts_each_logical_operation_once() {
        let m = monitor();
        m.record_probe_miss(TierLocation::Memory);
        m.record_hit(TierLocation::Disk, 100);
        m.record_miss(50);

        let stats = m.snapshot(EvictionSnapshot::default());
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.total_misses, 1);
        assert!((stats.overall_hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.memory_tier.misses, 1);
        assert_eq!(stats.disk_tier.hits, 1);
    }

    #[test]
    fn peak_memory_only_rises() {
        let m = monitor();
        let usage = |bytes| {
            [
                (TierLocation::Memory, bytes, 1),
                (TierLocation::Disk, 0, 0),
                (TierLocation::Cloud, 0, 0),
            ]
        };
        m.update_memory_usage(usage(500));
        m.update_memory_usage(usage(200));
        let stats = m.snapshot(EvictionSnapshot::default());
        assert_eq!(stats.total_memory_usage, 200);
        assert_eq!(stats.peak_memory_usage, 500);
    }

    #[test]
    fn health_critical_on_critical_pressure() {
        let m = monitor();
        m.set_pressure(PressureLevel::Critical);
        assert_eq!(m.health_status(), HealthStatus::Critical);
    }

    #[test]
    fn health_warning_on_unavailable_tier() {
        let m = monitor();
        m.set_tier_available(TierLocation::Disk, false);
        assert_eq!(m.health_status(), HealthStatus::Warning);
    }

    #[test]
    fn health_degrades_with_poor_hit_rate() {
        let m = monitor();
        for _ in 0..10 {
            m.record_miss(10);
        }
        assert_eq!(m.health_status(), HealthStatus::Warning);
    }

    #[test]
    fn healthy_with_good_hit_rate() {
        let m = monitor();
        for _ in 0..10 {
            m.record_hit(TierLocation::Memory, 10);
        }
        assert_eq!(m.health_status(), HealthStatus::Healthy);
    }

    #[test]
    fn reset_zeroes_counters() {
        let m = monitor();
        m.record_hit(TierLocation::Memory, 10);
        m.reset();
        let stats = m.snapshot(EvictionSnapshot::default());
        assert_eq!(stats.total_operations, 0);
        assert_eq!(stats.memory_tier.hits, 0);
    }
}
