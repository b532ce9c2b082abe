//! Tier selection and promotion policy
//!
//! Placement on store follows the policy's gating booleans plus the
//! memory tier's admission check; probing on retrieve is fastest-first.
//! Promotion copies an entry into a faster tier and always retains the
//! slower copy.

use std::sync::atomic::{AtomicU64, Ordering};

use arrayvec::ArrayVec;

use crate::cache::entry::{CacheEntry, CachePolicy};
use crate::cache::traits::TierLocation;

/// Decides store targets and promotion of slow-tier hits
pub struct TierSelector {
    /// Accesses beyond which a slow-tier hit is copied into memory
    promotion_access_threshold: AtomicU64,
    /// Entries larger than this never promote to memory
    small_object_bytes: AtomicU64,
    /// Cloud hits accessed within this window promote to disk
    disk_recency_window_ns: AtomicU64,
}

impl TierSelector {
    pub fn new(
        promotion_access_threshold: u64,
        small_object_bytes: u64,
        disk_recency_window_secs: u64,
    ) -> Self {
        Self {
            promotion_access_threshold: AtomicU64::new(promotion_access_threshold),
            small_object_bytes: AtomicU64::new(small_object_bytes),
            disk_recency_window_ns: AtomicU64::new(
                disk_recency_window_secs.saturating_mul(1_000_000_000),
            ),
        }
    }

    pub fn promotion_access_threshold(&self) -> u64 {
        self.promotion_access_threshold.load(Ordering::Relaxed)
    }

    /// Adjust the promotion access threshold (used by `optimize`)
    pub fn set_promotion_access_threshold(&self, threshold: u64) {
        self.promotion_access_threshold
            .store(threshold, Ordering::Relaxed);
    }

    /// Ordered tiers a store should write, fastest first
    ///
    /// Memory requires both the policy gate and a passing admission
    /// check; cloud requires the size to stay below the policy's
    /// threshold.
    pub fn store_targets(
        &self,
        policy: &CachePolicy,
        stored_size: u64,
        memory_can_store: bool,
        cloud_attached: bool,
    ) -> ArrayVec<TierLocation, 3> {
        let mut targets = ArrayVec::new();
        if policy.allow_memory && memory_can_store {
            targets.push(TierLocation::Memory);
        }
        if policy.persist_to_disk {
            targets.push(TierLocation::Disk);
        }
        if policy.distribute_to_cloud
            && cloud_attached
            && stored_size < policy.cloud_size_threshold
        {
            targets.push(TierLocation::Cloud);
        }
        targets
    }

    /// Whether a hit in `found_in` should be copied into the memory tier
    pub fn should_promote_to_memory(
        &self,
        entry: &CacheEntry,
        found_in: TierLocation,
        memory_can_store: bool,
    ) -> bool {
        found_in != TierLocation::Memory
            && memory_can_store
            && entry.access_count > self.promotion_access_threshold.load(Ordering::Relaxed)
            && entry.stored_size <= self.small_object_bytes.load(Ordering::Relaxed)
    }

    /// Whether a cloud hit should be copied onto disk
    pub fn should_promote_to_disk(&self, entry: &CacheEntry, now: u64) -> bool {
        let window = self.disk_recency_window_ns.load(Ordering::Relaxed);
        now.saturating_sub(entry.last_access_ns) <= window
    }
}
