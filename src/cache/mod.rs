//! Tiered cache internals
//!
//! Layering, fastest to slowest: `tier::MemoryTier` (L1),
//! `tier::DiskTier` (L2), `tier::CloudTier` (L3). The
//! `manager::CacheManager` orchestrates them; `transform` runs payloads
//! through compression and encryption on the way in and out.

pub mod config;
pub mod entry;
pub mod eviction;
pub mod manager;
pub mod policy;
pub mod tier;
pub mod traits;
pub mod transform;
