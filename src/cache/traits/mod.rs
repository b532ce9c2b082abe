//! Shared enumerations, error types and contracts for the cache system

pub mod types_and_enums;

pub use types_and_enums::{
    CacheOperationError, HealthStatus, ManagerState, PressureLevel, TierLocation,
};
