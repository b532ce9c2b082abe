//! Eviction policies and pressure-driven sweeps
//!
//! Victim selection is pure over entry metadata snapshots so each
//! policy is testable in isolation: LRU orders by last access with
//! insertion-sequence tie-break, LFU by access count, TTL removes every
//! expired entry regardless of the requested count, and Hybrid runs TTL
//! first then LRU among the remainder.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use crossbeam_utils::atomic::AtomicCell;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cache::entry::{EntryMeta, now_ns};
use crate::cache::tier::EvictableTier;
use crate::cache::traits::PressureLevel;

/// Replacement policy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvictionPolicyType {
    Lru,
    Lfu,
    Ttl,
    #[default]
    Hybrid,
}

/// Cumulative eviction counters
#[derive(Debug, Default)]
pub struct EvictionStats {
    pub evicted_entries: CachePadded<AtomicU64>,
    pub evicted_bytes: CachePadded<AtomicU64>,
    pub expired_entries: CachePadded<AtomicU64>,
    pub pressure_events: CachePadded<AtomicU64>,
}

/// Snapshot of [`EvictionStats`]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EvictionSnapshot {
    pub evicted_entries: u64,
    pub evicted_bytes: u64,
    pub expired_entries: u64,
    pub pressure_events: u64,
}

/// Enforces capacity and freshness across evictable tiers
pub struct EvictionManager {
    policy: AtomicCell<EvictionPolicyType>,
    warning_batch: AtomicUsize,
    critical_batch: AtomicUsize,
    critical_reduce_fraction: AtomicCell<f64>,
    stats: EvictionStats,
}

impl EvictionManager {
    pub fn new(
        policy: EvictionPolicyType,
        warning_batch: usize,
        critical_batch: usize,
        critical_reduce_fraction: f64,
    ) -> Self {
        Self {
            policy: AtomicCell::new(policy),
            warning_batch: AtomicUsize::new(warning_batch),
            critical_batch: AtomicUsize::new(critical_batch),
            critical_reduce_fraction: AtomicCell::new(critical_reduce_fraction),
            stats: EvictionStats::default(),
        }
    }

    pub fn policy(&self) -> EvictionPolicyType {
        self.policy.load()
    }

    pub fn set_policy(&self, policy: EvictionPolicyType) {
        self.policy.store(policy);
    }

    pub fn warning_batch(&self) -> usize {
        self.warning_batch.load(Ordering::Relaxed)
    }

    /// Adjust sweep batch sizes (used by `optimize`)
    pub fn set_batches(&self, warning: usize, critical: usize) {
        self.warning_batch.store(warning, Ordering::Relaxed);
        self.critical_batch.store(critical, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EvictionSnapshot {
        EvictionSnapshot {
            evicted_entries: self.stats.evicted_entries.load(Ordering::Relaxed),
            evicted_bytes: self.stats.evicted_bytes.load(Ordering::Relaxed),
            expired_entries: self.stats.expired_entries.load(Ordering::Relaxed),
            pressure_events: self.stats.pressure_events.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.evicted_entries.store(0, Ordering::Relaxed);
        self.stats.evicted_bytes.store(0, Ordering::Relaxed);
        self.stats.expired_entries.store(0, Ordering::Relaxed);
        self.stats.pressure_events.store(0, Ordering::Relaxed);
    }

    /// Evict up to `count` entries from `tier` under the active policy
    pub fn evict(&self, tier: &dyn EvictableTier, count: usize) -> usize {
        let now = now_ns();
        let victims = select_victims(tier.metadata(), count, self.policy.load(), now);
        let mut removed = 0usize;
        for victim in victims {
            if let Ok(bytes) = tier.evict_entry(&victim.key) {
                if bytes > 0 {
                    removed += 1;
                    self.stats.evicted_entries.fetch_add(1, Ordering::Relaxed);
                    self.stats.evicted_bytes.fetch_add(bytes, Ordering::Relaxed);
                    if victim.is_expired(now) {
                        self.stats.expired_entries.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        if removed > 0 {
            debug!(
                "evicted {} entries from {} tier",
                removed,
                tier.location().as_str()
            );
        }
        removed
    }

    /// Remove every expired entry from `tier`
    pub fn sweep_expired(&self, tier: &dyn EvictableTier) -> usize {
        let now = now_ns();
        let expired: Vec<EntryMeta> = tier
            .metadata()
            .into_iter()
            .filter(|meta| meta.is_expired(now))
            .collect();
        let mut removed = 0usize;
        for meta in expired {
            if let Ok(bytes) = tier.evict_entry(&meta.key) {
                if bytes > 0 {
                    removed += 1;
                    self.stats.evicted_entries.fetch_add(1, Ordering::Relaxed);
                    self.stats.expired_entries.fetch_add(1, Ordering::Relaxed);
                    self.stats.evicted_bytes.fetch_add(bytes, Ordering::Relaxed);
                }
            }
        }
        removed
    }

    /// React to a host memory-pressure signal against the memory tier
    pub fn handle_pressure(
        &self,
        level: PressureLevel,
        memory: &crate::cache::tier::MemoryTier,
    ) -> usize {
        match level {
            PressureLevel::Normal => 0,
            PressureLevel::Warning => {
                self.stats.pressure_events.fetch_add(1, Ordering::Relaxed);
                let batch = self.warning_batch.load(Ordering::Relaxed);
                info!("memory pressure warning: evicting up to {} entries", batch);
                self.evict(memory, batch)
            }
            PressureLevel::Critical => {
                self.stats.pressure_events.fetch_add(1, Ordering::Relaxed);
                let batch = self.critical_batch.load(Ordering::Relaxed);
                info!(
                    "memory pressure critical: evicting up to {} entries and reducing footprint",
                    batch
                );
                let removed = self.evict(memory, batch);
                let (forced, bytes) = memory.reduce_size(self.critical_reduce_fraction.load());
                self.stats
                    .evicted_entries
                    .fetch_add(forced as u64, Ordering::Relaxed);
                self.stats.evicted_bytes.fetch_add(bytes, Ordering::Relaxed);
                removed + forced
            }
        }
    }
}

/// Pure victim selection over a metadata snapshot
pub fn select_victims(
    mut entries: Vec<EntryMeta>,
    count: usize,
    policy: EvictionPolicyType,
    now: u64,
) -> Vec<EntryMeta> {
    match policy {
        EvictionPolicyType::Lru => {
            entries.sort_unstable_by_key(|m| (m.last_access_ns, m.sequence));
            entries.truncate(count);
            entries
        }
        EvictionPolicyType::Lfu => {
            entries.sort_unstable_by_key(|m| (m.access_count, m.last_access_ns, m.sequence));
            entries.truncate(count);
            entries
        }
        // TTL ignores the requested count: every expired entry goes
        EvictionPolicyType::Ttl => entries
            .into_iter()
            .filter(|m| m.is_expired(now))
            .collect(),
        EvictionPolicyType::Hybrid => {
            let (expired, mut rest): (Vec<EntryMeta>, Vec<EntryMeta>) =
                entries.into_iter().partition(|m| m.is_expired(now));
            let mut victims = expired;
            if victims.len() < count {
                rest.sort_unstable_by_key(|m| (m.last_access_ns, m.sequence));
                rest.truncate(count - victims.len());
                victims.extend(rest);
            }
            victims
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{CacheEntry, CachePolicy};
    use crate::cache::tier::MemoryTier;

    fn meta(key: &str, last_access: u64, count: u64, seq: u64, expires: Option<u64>) -> EntryMeta {
        EntryMeta {
            key: key.to_string(),
            stored_size: 10,
            access_count: count,
            last_access_ns: last_access,
            expires_at_ns: expires,
            sequence: seq,
        }
    }

    #[test]
    fn lru_orders_by_last_access_then_sequence() {
        let entries = vec![
            meta("b", 100, 0, 2, None),
            meta("a", 100, 0, 1, None),
            meta("c", 50, 0, 3, None),
        ];
        let victims = select_victims(entries, 2, EvictionPolicyType::Lru, 1_000);
        let keys: Vec<&str> = victims.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, ["c", "a"]);
    }

    #[test]
    fn lfu_orders_by_access_count() {
        let entries = vec![
            meta("hot", 10, 50, 0, None),
            meta("cold", 20, 1, 1, None),
            meta("warm", 30, 10, 2, None),
        ];
        let victims = select_victims(entries, 2, EvictionPolicyType::Lfu, 1_000);
        let keys: Vec<&str> = victims.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, ["cold", "warm"]);
    }

    #[test]
    fn ttl_ignores_requested_count() {
        let entries = vec![
            meta("e1", 0, 0, 0, Some(100)),
            meta("e2", 0, 0, 1, Some(200)),
            meta("live", 0, 0, 2, Some(10_000)),
        ];
        let victims = select_victims(entries, 1, EvictionPolicyType::Ttl, 500);
        assert_eq!(victims.len(), 2);
        assert!(victims.iter().all(|m| m.key.starts_with('e')));
    }

    #[test]
    fn hybrid_takes_expired_then_lru() {
        let entries = vec![
            meta("expired", 999, 0, 0, Some(100)),
            meta("oldest", 10, 0, 1, None),
            meta("newest", 900, 0, 2, None),
        ];
        let victims = select_victims(entries, 2, EvictionPolicyType::Hybrid, 500);
        let keys: Vec<&str> = victims.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, ["expired", "oldest"]);
    }

    fn filled_tier(count: usize) -> MemoryTier {
        let tier = MemoryTier::new(1024 * 1024, 10_000);
        for i in 0..count {
            let entry = CacheEntry::new(
                format!("k{}", i),
                vec![0u8; 100],
                100,
                false,
                false,
                &CachePolicy::default(),
                i as u64,
            );
            tier.store(entry).expect("store");
        }
        tier
    }

    #[test]
    fn warning_pressure_evicts_bounded_batch() {
        let manager = EvictionManager::new(EvictionPolicyType::Lru, 5, 50, 0.5);
        let tier = filled_tier(20);
        let removed = manager.handle_pressure(PressureLevel::Warning, &tier);
        assert_eq!(removed, 5);
        assert_eq!(tier.entry_count(), 15);
    }

    #[test]
    fn normal_pressure_is_noop() {
        let manager = EvictionManager::new(EvictionPolicyType::Lru, 5, 50, 0.5);
        let tier = filled_tier(10);
        assert_eq!(manager.handle_pressure(PressureLevel::Normal, &tier), 0);
        assert_eq!(tier.entry_count(), 10);
    }

    #[test]
    fn critical_pressure_forces_footprint_reduction() {
        let manager = EvictionManager::new(EvictionPolicyType::Lru, 5, 10, 0.5);
        let tier = filled_tier(100);
        let before = tier.footprint_bytes();
        manager.handle_pressure(PressureLevel::Critical, &tier);
        // 10 evicted by batch, then half the remainder forced out
        assert!(tier.footprint_bytes() <= before / 2);
        assert!(manager.snapshot().pressure_events >= 1);
    }

    #[test]
    fn stats_accumulate_and_reset() {
        let manager = EvictionManager::new(EvictionPolicyType::Lru, 5, 50, 0.5);
        let tier = filled_tier(10);
        manager.evict(&tier, 3);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.evicted_entries, 3);
        assert_eq!(snapshot.evicted_bytes, 300);
        manager.reset_stats();
        assert_eq!(manager.snapshot().evicted_entries, 0);
    }
}
