//! TTL- and capacity-bounded key/value store persisted through a storage backend.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::traits::{CacheValue, Clock, StorageBackend, StorageError};

/// Entries older than this are treated as absent.
pub const DEFAULT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Maximum entries kept per store.
pub const DEFAULT_CAPACITY: usize = 150;

const MAX_PERSIST_ATTEMPTS: usize = 3;

/// Quota retries never shrink the persisted store below this.
const MIN_PERSISTED_ENTRIES: usize = 10;

/// Expiry and size limits for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  pub ttl_ms: i64,
  pub capacity: usize,
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self {
      ttl_ms: DEFAULT_TTL_MS,
      capacity: DEFAULT_CAPACITY,
    }
  }
}

/// A stored value and the epoch-millis time it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub value: T,
  pub timestamp: i64,
  /// Write order within this session, breaks timestamp ties.
  #[serde(skip)]
  seq: u64,
}

impl<T> CacheEntry<T> {
  pub fn is_valid(&self, now: i64, ttl_ms: i64) -> bool {
    now - self.timestamp <= ttl_ms
  }
}

/// Keep the `n` most recently written entries.
pub fn trim_to_max<T>(
  mut entries: Vec<(String, CacheEntry<T>)>,
  n: usize,
) -> Vec<(String, CacheEntry<T>)> {
  if entries.len() <= n {
    return entries;
  }
  entries.sort_by(|a, b| {
    b.1
      .timestamp
      .cmp(&a.1.timestamp)
      .then_with(|| b.1.seq.cmp(&a.1.seq))
  });
  entries.truncate(n);
  entries
}

struct Entries<T> {
  map: HashMap<String, CacheEntry<T>>,
  next_seq: u64,
}

/// Generic result cache with lazy load, lazy expiry and quota-safe persistence.
///
/// The in-memory map is the source of truth for the session. Persistence is best
/// effort: failures are logged and never reach the caller.
pub struct ResultCacheStore<T> {
  store_id: String,
  backend: Arc<dyn StorageBackend>,
  policy: CachePolicy,
  clock: Arc<dyn Clock>,
  /// `None` until first access loads the persisted blob.
  entries: Mutex<Option<Entries<T>>>,
  /// Generation of the newest snapshot handed to the backend; 0 before any write.
  persisted: Mutex<u64>,
}

impl<T: CacheValue> ResultCacheStore<T> {
  pub fn new(
    store_id: impl Into<String>,
    backend: Arc<dyn StorageBackend>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      store_id: store_id.into(),
      backend,
      policy,
      clock,
      entries: Mutex::new(None),
      persisted: Mutex::new(0),
    }
  }

  /// Look up a value; expired entries read as absent and are dropped.
  pub fn get(&self, key: &str) -> Option<T> {
    let now = self.clock.now_millis();
    let ttl = self.policy.ttl_ms;
    self.with_entries(|entries| {
      let valid = entries.map.get(key)?.is_valid(now, ttl);
      if valid {
        entries.map.get(key).map(|entry| entry.value.clone())
      } else {
        entries.map.remove(key);
        None
      }
    })
  }

  pub fn contains(&self, key: &str) -> bool {
    self.get(key).is_some()
  }

  /// Write a value and persist the store before returning.
  #[cfg(test)]
  pub fn set(&self, key: impl Into<String>, value: T) {
    let (snapshot, generation) = self.insert(key.into(), value);
    self.persist(snapshot, generation);
  }

  /// Write a value; persistence runs on the blocking pool and is not awaited.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn set_detached(self: &Arc<Self>, key: impl Into<String>, value: T) {
    let (snapshot, generation) = self.insert(key.into(), value);
    let store = Arc::clone(self);
    tokio::task::spawn_blocking(move || store.persist(snapshot, generation));
  }

  pub fn len(&self) -> usize {
    self.with_entries(|entries| entries.map.len())
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Persist the current contents before returning.
  pub fn flush(&self) {
    let (snapshot, generation) = self.with_entries(|entries| {
      let snapshot = entries
        .map
        .iter()
        .map(|(k, e)| (k.clone(), e.clone()))
        .collect();
      (snapshot, entries.next_seq - 1)
    });
    self.persist(snapshot, generation);
  }

  /// Drop every entry, in memory and on the backend.
  pub fn reset(&self) {
    let generation = self.with_entries(|entries| {
      entries.map.clear();
      let generation = entries.next_seq;
      entries.next_seq += 1;
      generation
    });

    // Snapshots taken before the reset must not resurrect the old blob
    let mut persisted = self.lock_persisted();
    *persisted = (*persisted).max(generation);
    if let Err(e) = self.backend.remove(&self.store_id) {
      error!("Failed to remove persisted cache '{}': {}", self.store_id, e);
    }
  }

  fn insert(&self, key: String, value: T) -> (Vec<(String, CacheEntry<T>)>, u64) {
    let timestamp = self.clock.now_millis();
    let capacity = self.policy.capacity;

    self.with_entries(|entries| {
      let seq = entries.next_seq;
      entries.next_seq += 1;
      entries.map.insert(
        key,
        CacheEntry {
          value,
          timestamp,
          seq,
        },
      );

      if entries.map.len() > capacity {
        let all: Vec<_> = entries.map.drain().collect();
        entries.map = trim_to_max(all, capacity).into_iter().collect();
      }

      let snapshot = entries
        .map
        .iter()
        .map(|(k, e)| (k.clone(), e.clone()))
        .collect();
      (snapshot, seq)
    })
  }

  /// Serialize `snapshot` to the backend, halving it on quota errors.
  fn persist(&self, snapshot: Vec<(String, CacheEntry<T>)>, generation: u64) {
    let mut persisted = self.lock_persisted();
    if generation <= *persisted {
      debug!(
        "Skipping snapshot {} of '{}' (already persisted {})",
        generation, self.store_id, *persisted
      );
      return;
    }
    *persisted = generation;

    let mut retained = snapshot;
    for attempt in 1..=MAX_PERSIST_ATTEMPTS {
      let blob = match encode(&retained) {
        Ok(blob) => blob,
        Err(e) => {
          error!("Failed to serialize cache '{}': {}", self.store_id, e);
          return;
        }
      };

      match self.backend.write(&self.store_id, &blob) {
        Ok(()) => {
          if attempt > 1 {
            info!(
              "Persisted '{}' with {} entries after {} attempts",
              self.store_id,
              retained.len(),
              attempt
            );
          }
          return;
        }
        Err(StorageError::QuotaExceeded { size, .. }) => {
          let target = (retained.len() / 2).max(MIN_PERSISTED_ENTRIES);
          warn!(
            "Quota exceeded writing '{}' ({} bytes, {} entries), retrying with {}",
            self.store_id,
            size,
            retained.len(),
            target
          );
          retained = trim_to_max(retained, target);
        }
        Err(e) => {
          error!("Error saving cache '{}': {}", self.store_id, e);
          return;
        }
      }
    }

    warn!(
      "Unable to persist cache '{}' after {} attempts, keeping it in memory only",
      self.store_id, MAX_PERSIST_ATTEMPTS
    );
  }

  fn with_entries<R>(&self, f: impl FnOnce(&mut Entries<T>) -> R) -> R {
    let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    let entries = guard.get_or_insert_with(|| self.load());
    f(entries)
  }

  fn lock_persisted(&self) -> MutexGuard<'_, u64> {
    self.persisted.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Read the persisted blob, keeping only well-formed, unexpired entries.
  fn load(&self) -> Entries<T> {
    let empty = || Entries {
      map: HashMap::new(),
      next_seq: 1,
    };

    let raw = match self.backend.read(&self.store_id) {
      Ok(Some(raw)) => raw,
      Ok(None) => return empty(),
      Err(e) => {
        warn!("Failed to read cache '{}': {}", self.store_id, e);
        return empty();
      }
    };

    let parsed: HashMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
      Ok(parsed) => parsed,
      Err(e) => {
        warn!("Discarding corrupt cache '{}': {}", self.store_id, e);
        return empty();
      }
    };

    let now = self.clock.now_millis();
    let total = parsed.len();
    let valid: Vec<(String, CacheEntry<T>)> = parsed
      .into_iter()
      .filter_map(|(key, value)| {
        let entry: CacheEntry<T> = serde_json::from_value(value).ok()?;
        entry
          .is_valid(now, self.policy.ttl_ms)
          .then_some((key, entry))
      })
      .collect();

    debug!(
      "Loaded cache '{}' from {}: {} of {} entries kept",
      self.store_id,
      self.backend.name(),
      valid.len(),
      total
    );

    Entries {
      map: trim_to_max(valid, self.policy.capacity)
        .into_iter()
        .collect(),
      next_seq: 1,
    }
  }
}

fn encode<T: Serialize>(entries: &[(String, CacheEntry<T>)]) -> serde_json::Result<String> {
  let map: BTreeMap<&str, &CacheEntry<T>> = entries.iter().map(|(k, e)| (k.as_str(), e)).collect();
  serde_json::to_string(&map)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::cache::traits::test_support::ManualClock;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  const T0: i64 = 1_700_000_000_000;

  /// Backend that reports quota exhaustion for the next `fail_next` writes.
  #[derive(Default)]
  struct FlakyStorage {
    inner: MemoryStorage,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
  }

  impl StorageBackend for FlakyStorage {
    fn read(&self, store: &str) -> Result<Option<String>, StorageError> {
      self.inner.read(store)
    }

    fn write(&self, store: &str, blob: &str) -> Result<(), StorageError> {
      self.attempts.fetch_add(1, Ordering::SeqCst);
      let remaining = self.fail_next.load(Ordering::SeqCst);
      if remaining > 0 {
        self.fail_next.store(remaining - 1, Ordering::SeqCst);
        return Err(StorageError::QuotaExceeded {
          store: store.to_string(),
          size: blob.len(),
        });
      }
      self.inner.write(store, blob)
    }

    fn remove(&self, store: &str) -> Result<(), StorageError> {
      self.inner.remove(store)
    }

    fn name(&self) -> &'static str {
      "flaky"
    }
  }

  fn store_with(
    backend: Arc<dyn StorageBackend>,
    clock: Arc<ManualClock>,
  ) -> ResultCacheStore<String> {
    ResultCacheStore::new("test", backend, CachePolicy::default(), clock)
  }

  fn persisted_len(backend: &dyn StorageBackend) -> usize {
    let raw = backend.read("test").unwrap().unwrap();
    let map: HashMap<String, serde_json::Value> = serde_json::from_str(&raw).unwrap();
    map.len()
  }

  #[test]
  fn test_get_after_set() {
    let store = store_with(
      Arc::new(MemoryStorage::default()),
      Arc::new(ManualClock::at(T0)),
    );
    store.set("k", "v".to_string());
    assert_eq!(store.get("k").as_deref(), Some("v"));
    assert_eq!(store.get("missing"), None);
  }

  #[test]
  fn test_ttl_boundary() {
    let clock = Arc::new(ManualClock::at(T0));
    let store = store_with(Arc::new(MemoryStorage::default()), clock.clone());
    store.set("k", "v".to_string());

    clock.set(T0 + DEFAULT_TTL_MS - 1);
    assert!(store.get("k").is_some());

    clock.set(T0 + DEFAULT_TTL_MS);
    assert!(store.get("k").is_some());

    clock.advance(1);
    assert!(store.get("k").is_none());
    assert_eq!(store.len(), 0);
  }

  #[test]
  fn test_capacity_keeps_most_recent() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let store = store_with(backend.clone(), Arc::new(ManualClock::at(T0)));

    for i in 0..(DEFAULT_CAPACITY + 10) {
      store.set(format!("key-{}", i), i.to_string());
      assert!(store.len() <= DEFAULT_CAPACITY);
    }

    assert_eq!(store.len(), DEFAULT_CAPACITY);
    for i in 0..10 {
      assert!(store.get(&format!("key-{}", i)).is_none());
    }
    for i in 10..(DEFAULT_CAPACITY + 10) {
      assert!(store.get(&format!("key-{}", i)).is_some());
    }
    assert_eq!(persisted_len(backend.as_ref()), DEFAULT_CAPACITY);
  }

  #[test]
  fn test_trim_to_max_orders_by_timestamp() {
    let entry = |value: i32, timestamp: i64| CacheEntry {
      value,
      timestamp,
      seq: 0,
    };
    let entries = vec![
      ("old".to_string(), entry(1, 10)),
      ("new".to_string(), entry(2, 30)),
      ("mid".to_string(), entry(3, 20)),
    ];
    let kept: Vec<String> = trim_to_max(entries, 2)
      .into_iter()
      .map(|(k, _)| k)
      .collect();
    assert_eq!(kept, vec!["new".to_string(), "mid".to_string()]);
  }

  #[test]
  fn test_quota_retry_halves_twice() {
    let flaky = Arc::new(FlakyStorage::default());
    let store = store_with(flaky.clone(), Arc::new(ManualClock::at(T0)));

    for i in 0..DEFAULT_CAPACITY {
      store.set(format!("key-{}", i), i.to_string());
    }
    flaky.attempts.store(0, Ordering::SeqCst);
    flaky.fail_next.store(2, Ordering::SeqCst);

    store.set("latest", "value".to_string());

    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    assert!(persisted_len(flaky.as_ref()) <= DEFAULT_CAPACITY / 4);
    // The session still sees everything
    assert_eq!(store.len(), DEFAULT_CAPACITY);
    assert_eq!(store.get("latest").as_deref(), Some("value"));
  }

  #[test]
  fn test_quota_exhausted_is_silent() {
    let flaky = Arc::new(FlakyStorage::default());
    flaky.fail_next.store(usize::MAX, Ordering::SeqCst);
    let store = store_with(flaky.clone(), Arc::new(ManualClock::at(T0)));

    store.set("k", "v".to_string());

    assert_eq!(flaky.attempts.load(Ordering::SeqCst), MAX_PERSIST_ATTEMPTS);
    assert_eq!(flaky.read("test").unwrap(), None);
    assert_eq!(store.get("k").as_deref(), Some("v"));
  }

  #[test]
  fn test_load_drops_expired_and_malformed() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let blob = serde_json::json!({
      "fresh": { "value": "a", "timestamp": T0 - 1000 },
      "expired": { "value": "b", "timestamp": T0 - DEFAULT_TTL_MS - 1 },
      "no-timestamp": { "value": "c" },
      "wrong-type": { "value": 42, "timestamp": T0 },
    });
    backend.write("test", &blob.to_string()).unwrap();

    let store = store_with(backend, Arc::new(ManualClock::at(T0)));
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("fresh").as_deref(), Some("a"));
  }

  #[test]
  fn test_corrupt_blob_loads_empty() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    backend.write("test", "{not json").unwrap();

    let store = store_with(backend, Arc::new(ManualClock::at(T0)));
    assert!(store.is_empty());
    store.set("k", "v".to_string());
    assert_eq!(store.get("k").as_deref(), Some("v"));
  }

  #[test]
  fn test_reload_in_new_session() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let clock = Arc::new(ManualClock::at(T0));

    store_with(backend.clone(), clock.clone()).set("k", "v".to_string());

    let next_session = store_with(backend, clock);
    assert_eq!(next_session.get("k").as_deref(), Some("v"));
  }

  #[test]
  fn test_reset_clears_memory_and_backend() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let store = store_with(backend.clone(), Arc::new(ManualClock::at(T0)));
    store.set("k", "v".to_string());

    store.reset();

    assert!(store.is_empty());
    assert_eq!(backend.read("test").unwrap(), None);
  }

  #[test]
  fn test_stale_snapshot_does_not_overwrite_newer() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let store = store_with(backend.clone(), Arc::new(ManualClock::at(T0)));

    let (older, older_gen) = store.insert("a".to_string(), "1".to_string());
    let (newer, newer_gen) = store.insert("b".to_string(), "2".to_string());
    store.persist(newer, newer_gen);
    store.persist(older, older_gen);

    assert_eq!(persisted_len(backend.as_ref()), 2);
  }

  #[test]
  fn test_snapshot_taken_before_reset_is_dropped() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let store = store_with(backend.clone(), Arc::new(ManualClock::at(T0)));

    let (pending, generation) = store.insert("a".to_string(), "1".to_string());
    store.reset();
    store.persist(pending, generation);

    assert_eq!(backend.read("test").unwrap(), None);
    assert!(store.is_empty());
  }

  #[test]
  fn test_flush_writes_current_contents() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let store = store_with(backend.clone(), Arc::new(ManualClock::at(T0)));

    let _ = store.insert("a".to_string(), "1".to_string());
    let _ = store.insert("b".to_string(), "2".to_string());
    assert_eq!(backend.read("test").unwrap(), None);

    store.flush();
    assert_eq!(persisted_len(backend.as_ref()), 2);
  }

  #[tokio::test]
  async fn test_set_detached_persists_in_background() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let store = Arc::new(store_with(backend.clone(), Arc::new(ManualClock::at(T0))));

    store.set_detached("k", "v".to_string());
    // Visible immediately, regardless of persistence
    assert_eq!(store.get("k").as_deref(), Some("v"));

    for _ in 0..100 {
      if backend.read("test").unwrap().is_some() {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(persisted_len(backend.as_ref()), 1);
  }
}
