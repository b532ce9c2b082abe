//! Memory tier (L1): capacity-bounded in-process store
//!
//! Lock-free concurrent index with an atomic byte footprint. Retrievals
//! on different keys run fully in parallel; mutations on the same key
//! are exclusive through the index's shard locking. The byte budget is
//! a hard bound: `can_store` is the admission check and `store` rejects
//! writes that would exceed it.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use dashmap::DashMap;
use log::debug;

use super::EvictableTier;
use crate::cache::entry::{CacheEntry, EntryMeta, now_ns};
use crate::cache::traits::{CacheOperationError, TierLocation};

pub struct MemoryTier {
    index: DashMap<String, CacheEntry>,
    footprint: CachePadded<AtomicU64>,
    max_bytes: u64,
    max_entries: usize,
}

impl MemoryTier {
    pub fn new(max_bytes: u64, max_entries: usize) -> Self {
        Self {
            index: DashMap::new(),
            footprint: CachePadded::new(AtomicU64::new(0)),
            max_bytes,
            max_entries,
        }
    }

    /// Whether accepting `entry` would stay within the byte and entry budgets
    pub fn can_store(&self, entry: &CacheEntry) -> bool {
        let occupied = self.footprint.load(Ordering::Relaxed);
        let replaced = self
            .index
            .get(&entry.key)
            .map(|existing| existing.stored_size)
            .unwrap_or(0);
        let projected = occupied.saturating_sub(replaced) + entry.stored_size;
        let new_entry = replaced == 0 && !self.index.contains_key(&entry.key);
        projected <= self.max_bytes
            && (!new_entry || self.index.len() < self.max_entries)
    }

    /// Insert or replace an entry, rejecting writes that would push the
    /// footprint past the byte budget
    ///
    /// The bytes are reserved with a compare-and-swap before the insert,
    /// so concurrent stores that each passed `can_store` cannot overshoot
    /// the budget together. Replacing an existing entry releases the old
    /// bytes only after the insert, which can transiently reject a
    /// replacement near the budget; callers fall back to eviction.
    pub fn store(&self, entry: CacheEntry) -> Result<(), CacheOperationError> {
        let added = entry.stored_size;
        if added > self.max_bytes {
            return Err(CacheOperationError::MemoryLimitExceeded);
        }
        if !self.index.contains_key(&entry.key) && self.index.len() >= self.max_entries {
            return Err(CacheOperationError::MemoryLimitExceeded);
        }

        let mut occupied = self.footprint.load(Ordering::Relaxed);
        loop {
            if occupied + added > self.max_bytes {
                return Err(CacheOperationError::MemoryLimitExceeded);
            }
            match self.footprint.compare_exchange_weak(
                occupied,
                occupied + added,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => occupied = current,
            }
        }

        if let Some(previous) = self.index.insert(entry.key.clone(), entry) {
            self.footprint
                .fetch_sub(previous.stored_size, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Fetch an entry, bumping its access metadata; expired entries are
    /// removed and reported as a miss
    pub fn retrieve(&self, key: &str) -> Option<CacheEntry> {
        let now = now_ns();
        let expired = {
            let mut slot = self.index.get_mut(key)?;
            if slot.is_expired(now) {
                true
            } else {
                slot.touch(now);
                return Some(slot.clone());
            }
        };
        if expired {
            self.remove(key);
        }
        None
    }

    /// Whether a live (non-expired) copy of `key` is resident
    pub fn contains(&self, key: &str) -> bool {
        self.index
            .get(key)
            .map(|slot| !slot.is_expired(now_ns()))
            .unwrap_or(false)
    }

    /// Bump access metadata without returning the payload
    pub fn update_access(&self, key: &str) {
        if let Some(mut slot) = self.index.get_mut(key) {
            slot.touch(now_ns());
        }
    }

    /// Remove an entry; returns the bytes freed
    pub fn remove(&self, key: &str) -> u64 {
        match self.index.remove(key) {
            Some((_, entry)) => {
                self.footprint
                    .fetch_sub(entry.stored_size, Ordering::Relaxed);
                entry.stored_size
            }
            None => 0,
        }
    }

    pub fn clear(&self) {
        self.index.clear();
        self.footprint.store(0, Ordering::Relaxed);
    }

    /// Keys carrying the given tag, for bulk invalidation
    pub fn keys_with_tag(&self, tag: &str) -> Vec<String> {
        self.index
            .iter()
            .filter(|slot| slot.tags.contains(tag))
            .map(|slot| slot.key.clone())
            .collect()
    }

    /// Evict least-recently-used entries until `fraction` of the current
    /// footprint is freed; returns (entries removed, bytes freed)
    pub fn reduce_size(&self, fraction: f64) -> (usize, u64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let target = (self.footprint.load(Ordering::Relaxed) as f64 * fraction) as u64;
        if target == 0 {
            return (0, 0);
        }

        let mut candidates: Vec<(u64, u64, String)> = self
            .index
            .iter()
            .map(|slot| (slot.last_access_ns, slot.sequence, slot.key.clone()))
            .collect();
        candidates.sort_unstable();

        let mut freed = 0u64;
        let mut removed = 0usize;
        for (_, _, key) in candidates {
            if freed >= target {
                break;
            }
            let bytes = self.remove(&key);
            if bytes > 0 {
                freed += bytes;
                removed += 1;
            }
        }
        debug!(
            "memory tier reduce_size freed {} bytes across {} entries",
            freed, removed
        );
        (removed, freed)
    }
}

impl EvictableTier for MemoryTier {
    fn location(&self) -> TierLocation {
        TierLocation::Memory
    }

    fn metadata(&self) -> Vec<EntryMeta> {
        self.index.iter().map(|slot| slot.meta()).collect()
    }

    fn evict_entry(&self, key: &str) -> Result<u64, CacheOperationError> {
        Ok(self.remove(key))
    }

    fn entry_count(&self) -> usize {
        self.index.len()
    }

    fn footprint_bytes(&self) -> u64 {
        self.footprint.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CachePolicy;
    use std::time::Duration;

    fn entry(key: &str, size: usize, seq: u64) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            vec![0u8; size],
            size as u64,
            false,
            false,
            &CachePolicy::default(),
            seq,
        )
    }

    #[test]
    fn footprint_tracks_stores_and_removes() {
        let tier = MemoryTier::new(1024, 16);
        tier.store(entry("a", 100, 0)).expect("store");
        tier.store(entry("b", 200, 1)).expect("store");
        assert_eq!(tier.footprint_bytes(), 300);

        // Replacement subtracts the old size first
        tier.store(entry("a", 50, 2)).expect("store");
        assert_eq!(tier.footprint_bytes(), 250);

        assert_eq!(tier.remove("b"), 200);
        assert_eq!(tier.footprint_bytes(), 50);
    }

    #[test]
    fn can_store_enforces_byte_budget() {
        let tier = MemoryTier::new(256, 16);
        tier.store(entry("a", 200, 0)).expect("store");
        assert!(!tier.can_store(&entry("b", 100, 1)));
        assert!(tier.can_store(&entry("b", 56, 1)));
        // Replacing an existing entry only accounts the delta
        assert!(tier.can_store(&entry("a", 256, 2)));
    }

    #[test]
    fn byte_budget_holds_under_concurrent_stores() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;

        let tier = Arc::new(MemoryTier::new(8192, 1024));
        let done = Arc::new(AtomicBool::new(false));

        // Sample the footprint while writers race the admission check
        let sampler = {
            let tier = Arc::clone(&tier);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let footprint = tier.footprint_bytes();
                    assert!(
                        footprint <= 8192,
                        "footprint {} exceeds budget 8192",
                        footprint
                    );
                }
            })
        };

        let writers: Vec<_> = (0..8u64)
            .map(|t| {
                let tier = Arc::clone(&tier);
                std::thread::spawn(move || {
                    for i in 0..64u64 {
                        // Rejections are expected once the budget fills
                        let _ = tier.store(entry(&format!("t{}k{}", t, i), 1024, t * 64 + i));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer");
        }
        done.store(true, Ordering::Relaxed);
        sampler.join().expect("footprint stayed within budget");
        assert!(tier.footprint_bytes() <= 8192);
    }

    #[test]
    fn retrieve_bumps_access_metadata() {
        let tier = MemoryTier::new(1024, 16);
        tier.store(entry("a", 10, 0)).expect("store");
        let first = tier.retrieve("a").expect("hit");
        let second = tier.retrieve("a").expect("hit");
        assert_eq!(first.access_count, 1);
        assert_eq!(second.access_count, 2);
    }

    #[test]
    fn expired_entries_miss_and_are_dropped() {
        let tier = MemoryTier::new(1024, 16);
        let policy = CachePolicy::default().with_ttl(Duration::from_nanos(1));
        let e = CacheEntry::new("a".into(), vec![0u8; 10], 10, false, false, &policy, 0);
        tier.store(e).expect("store");
        std::thread::sleep(Duration::from_millis(2));
        assert!(tier.retrieve("a").is_none());
        assert_eq!(tier.entry_count(), 0);
        assert_eq!(tier.footprint_bytes(), 0);
    }

    #[test]
    fn reduce_size_frees_lru_first() {
        let tier = MemoryTier::new(10_000, 64);
        for i in 0..10 {
            tier.store(entry(&format!("k{}", i), 100, i)).expect("store");
        }
        // Touch the newest five so the oldest five are LRU victims
        for i in 5..10 {
            tier.update_access(&format!("k{}", i));
        }
        let (removed, freed) = tier.reduce_size(0.5);
        assert_eq!(removed, 5);
        assert_eq!(freed, 500);
        for i in 5..10 {
            assert!(tier.contains(&format!("k{}", i)));
        }
    }

    #[test]
    fn clear_resets_footprint() {
        let tier = MemoryTier::new(1024, 16);
        tier.store(entry("a", 100, 0)).expect("store");
        tier.clear();
        assert_eq!(tier.footprint_bytes(), 0);
        assert_eq!(tier.entry_count(), 0);
    }

    #[test]
    fn tag_lookup_finds_tagged_keys() {
        let tier = MemoryTier::new(1024, 16);
        let policy = CachePolicy::default().with_tag("session");
        let e = CacheEntry::new("a".into(), vec![0u8; 4], 4, false, false, &policy, 0);
        tier.store(e).expect("store");
        tier.store(entry("b", 4, 1)).expect("store");
        assert_eq!(tier.keys_with_tag("session"), vec!["a".to_string()]);
    }
}
