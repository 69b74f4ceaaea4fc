//! Generic caching layer for catalog results.
//!
//! This module provides an API-agnostic result cache that:
//! - Keeps values in memory for the session, keyed by string
//! - Expires entries lazily after a TTL and evicts the oldest beyond a capacity
//! - Persists each store as one JSON blob through a pluggable storage backend
//! - Survives quota exhaustion by persisting progressively smaller snapshots

mod storage;
mod store;
mod traits;

#[cfg(test)]
pub use storage::MemoryStorage;
pub use storage::open_backend;
pub use store::{CachePolicy, ResultCacheStore, DEFAULT_CAPACITY};
pub use traits::{Clock, StorageBackend, SystemClock};
