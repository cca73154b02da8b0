//! Versioned response cache for offline support.
//!
//! This module provides the storage side of the worker:
//! - Named partitions holding response snapshots keyed by request identity,
//!   each carrying its persisted lifecycle state
//! - A SQLite backend for durable storage and an in-memory one for tests
//! - Partition-scoped operations: lookup, store, all-or-nothing precache,
//!   and best-effort pruning of stale partitions

mod layer;
mod storage;
mod traits;

pub use layer::{is_cacheable, CacheLayer};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CachedResponse, FetchResult, PartitionState, ResponseSource};
