//! Cache entry and per-store policy types
//!
//! A `CacheEntry` is the unit of storage shared by all tiers: an opaque
//! post-transform payload plus the metadata the eviction and promotion
//! machinery operates on. A `CachePolicy` is the immutable per-store
//! configuration that gates which tiers a write targets.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current time as nanoseconds since the Unix epoch
#[inline]
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Entry priority classes, ordered low to critical
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Unit of storage across all cache tiers
///
/// The payload is opaque post-transform bytes; `compressed`/`encrypted`
/// record exactly which transforms were applied since decoding branches
/// on them. `sequence` is a monotonic insertion counter used to break
/// LRU ties deterministically.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    /// Size of the serialized value before any transform
    pub raw_size: u64,
    /// Actual bytes written to the tier (equals `payload.len()`)
    pub stored_size: u64,
    pub created_at_ns: u64,
    pub expires_at_ns: Option<u64>,
    pub access_count: u64,
    pub last_access_ns: u64,
    pub sequence: u64,
    pub compressed: bool,
    pub encrypted: bool,
    pub priority: Priority,
    /// Tags for bulk invalidation
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    /// Create a new entry from a transformed payload
    pub fn new(
        key: String,
        payload: Vec<u8>,
        raw_size: u64,
        compressed: bool,
        encrypted: bool,
        policy: &CachePolicy,
        sequence: u64,
    ) -> Self {
        let now = now_ns();
        let stored_size = payload.len() as u64;
        Self {
            key,
            payload,
            raw_size,
            stored_size,
            created_at_ns: now,
            expires_at_ns: policy.ttl.map(|ttl| now.saturating_add(ttl.as_nanos() as u64)),
            access_count: 0,
            last_access_ns: now,
            sequence,
            compressed,
            encrypted,
            priority: policy.priority,
            tags: policy.tags.clone(),
        }
    }

    /// Whether the entry's TTL has elapsed at `now`
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at_ns.is_some_and(|deadline| now >= deadline)
    }

    /// Record a successful retrieval or promotion
    #[inline]
    pub fn touch(&mut self, now: u64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_access_ns = now;
    }

    /// Eviction-relevant metadata without the payload
    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            stored_size: self.stored_size,
            access_count: self.access_count,
            last_access_ns: self.last_access_ns,
            expires_at_ns: self.expires_at_ns,
            sequence: self.sequence,
        }
    }
}

/// Payload-free entry metadata used for victim selection
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub key: String,
    pub stored_size: u64,
    pub access_count: u64,
    pub last_access_ns: u64,
    pub expires_at_ns: Option<u64>,
    pub sequence: u64,
}

impl EntryMeta {
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at_ns.is_some_and(|deadline| now >= deadline)
    }
}

/// Immutable per-store policy
///
/// `allow_memory`/`persist_to_disk`/`distribute_to_cloud` gate tier
/// placement; `cloud_size_threshold` caps what is shipped to the remote
/// store. Validation happens before any I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    pub ttl: Option<Duration>,
    pub priority: Priority,
    pub allow_memory: bool,
    pub persist_to_disk: bool,
    pub distribute_to_cloud: bool,
    pub cloud_size_threshold: u64,
    pub compression_enabled: bool,
    pub encryption_required: bool,
    pub tags: BTreeSet<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: None,
            priority: Priority::Normal,
            allow_memory: true,
            persist_to_disk: true,
            distribute_to_cloud: false,
            cloud_size_threshold: 1024 * 1024,
            compression_enabled: true,
            encryption_required: false,
            tags: BTreeSet::new(),
        }
    }
}

impl CachePolicy {
    /// Policy that keeps the value in memory only
    pub fn memory_only() -> Self {
        Self {
            persist_to_disk: false,
            ..Self::default()
        }
    }

    /// Builder-style TTL setter
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Builder-style priority setter
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder-style tag setter
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// True when every tier is gated off
    pub fn targets_no_tier(&self) -> bool {
        !self.allow_memory && !self.persist_to_disk && !self.distribute_to_cloud
    }
}
