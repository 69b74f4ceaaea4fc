//! Core traits and types for the caching system.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Values that can live in a cache store.
///
/// Stores are persisted as JSON and shared with background persistence tasks,
/// so values must round-trip through serde and cross threads.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
  /// The write would exceed the medium's size limit.
  #[error("storage quota exceeded for '{store}' ({size} bytes)")]
  QuotaExceeded { store: String, size: usize },

  /// Any other backend failure.
  #[error("storage backend failure: {0}")]
  Backend(String),
}

/// Durable storage for serialized cache stores.
///
/// Each logical store is a single blob under a fixed identifier. Implementations
/// are selected once at startup and shared by every cache store of the session.
pub trait StorageBackend: Send + Sync {
  /// Read the blob persisted for `store`, if any.
  fn read(&self, store: &str) -> Result<Option<String>, StorageError>;

  /// Replace the blob persisted for `store`.
  fn write(&self, store: &str, blob: &str) -> Result<(), StorageError>;

  /// Drop the blob persisted for `store`.
  fn remove(&self, store: &str) -> Result<(), StorageError>;

  /// Short name for log output.
  fn name(&self) -> &'static str;
}

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
}

/// Wall clock backed by chrono.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}
