//! StrataCache prelude - convenient imports for users

// Re-export the public API
pub use crate::stratacache::{StrataCache, StrataCacheBuilder};

// Per-store policy and the pieces it is built from
pub use crate::cache::entry::{CachePolicy, Priority};
pub use crate::cache::eviction::EvictionPolicyType;

// Error and status types callers match on
pub use crate::cache::traits::{
    CacheOperationError, HealthStatus, ManagerState, PressureLevel, TierLocation,
};

// External collaborator traits for the cloud tier and encryption
pub use crate::cache::tier::{InMemoryRemoteStore, RemoteStore};
pub use crate::cache::transform::{Encryptor, KeystreamEncryptor};

// Configuration and reports
pub use crate::cache::config::CacheConfig;
pub use crate::cache::manager::{OptimizeReport, PreloadReport};
pub use crate::telemetry::CacheStatistics;

// Re-export serde traits that users' value types need to implement
pub use serde::{Deserialize, Serialize};
