//! Per-user session cache over the reconciled quota view

pub mod cache;
pub mod snapshot;

pub use cache::{AdvisoryQuota, AdvisorySource, SessionCache, SessionCacheStats, DEFAULT_SESSION_TTL};
pub use snapshot::{
    FileSnapshotStore, MemorySnapshotStore, SessionSnapshot, SnapshotError, SnapshotStore,
};
