//! StrataCache - tiered cache with memory, disk and cloud layers
//!
//! Values live in up to three tiers: an in-process memory tier (L1), a
//! persistent append-only disk tier (L2), and an optional remote cloud
//! tier (L3). Retrievals probe fastest-first and hot entries promote
//! upward; payloads run through a compression and encryption pipeline
//! before any tier sees them.
//!
//! # Features
//!
//! - **Tiered placement**: per-store policies gate which tiers a value
//!   reaches, with a size cap on what ships to the cloud
//! - **Promotion**: repeatedly accessed slow-tier entries are copied
//!   into faster tiers automatically
//! - **Eviction**: LRU, LFU, TTL and hybrid policies plus a response to
//!   host memory-pressure signals
//! - **Durability**: the disk tier is a checksummed append-only log
//!   rebuilt by scanning on open, so torn writes are truncated away
//! - **Transforms**: LZ4/deflate compression and pluggable encryption
//! - **Observability**: per-tier statistics and a derived health status

pub mod prelude;
pub mod stratacache;

pub mod cache;
pub mod telemetry;

pub use cache::entry::{CachePolicy, Priority};
pub use cache::traits::CacheOperationError;
pub use stratacache::{StrataCache, StrataCacheBuilder};
pub use prelude::*;
