//! Storage tiers: in-process memory (L1), persistent disk (L2) and
//! optional remote cloud (L3)
//!
//! All tiers share one contract; the orchestrator iterates the closed
//! `Memory | Disk | Cloud` set rather than dispatching over an open
//! hierarchy.

pub mod cloud;
pub mod disk;
pub mod memory;

pub use cloud::{CloudTier, InMemoryRemoteStore, RemoteStore};
pub use disk::DiskTier;
pub use memory::MemoryTier;

use crate::cache::entry::EntryMeta;
use crate::cache::traits::{CacheOperationError, TierLocation};

/// Contract shared by the tiers the eviction manager can sweep
pub trait EvictableTier: Send + Sync {
    fn location(&self) -> TierLocation;

    /// Payload-free snapshot of every resident entry
    fn metadata(&self) -> Vec<EntryMeta>;

    /// Remove one entry; returns the bytes freed (0 when absent)
    fn evict_entry(&self, key: &str) -> Result<u64, CacheOperationError>;

    fn entry_count(&self) -> usize;

    fn footprint_bytes(&self) -> u64;
}
