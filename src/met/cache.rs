//! Canonical query keys and the two catalog caches.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cache::{CachePolicy, Clock, ResultCacheStore, StorageBackend};
use crate::query::QueryParams;

use super::types::{DetailEntry, Lookup, ObjectListEntry};

/// Store identifier of result pages
pub const OBJECT_LIST_STORE: &str = "objectListCache";

/// Store identifier of item details
pub const OBJECT_DETAIL_STORE: &str = "objectDetailCache";

// ============================================================================
// Query key
// ============================================================================

/// Parameters that identify one cached result page.
///
/// Unset fields are left out of the key, so logically equal parameter sets
/// always produce the same string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryKey {
  pub page: u32,
  pub department_id: Option<u64>,
  pub q: Option<String>,
  pub has_images: Option<bool>,
  pub search_by: Option<&'static str>,
  pub is_highlight: Option<bool>,
  pub open_access: Option<bool>,
}

impl QueryKey {
  pub fn for_params(params: &QueryParams) -> Self {
    Self {
      page: params.page(),
      department_id: params.department_id.filter(|d| *d > 0),
      q: params.query.clone(),
      has_images: params.has_images,
      search_by: params.search_by.key_value(),
      is_highlight: params.is_highlight,
      open_access: params.open_access,
    }
  }

  /// JSON object of the set fields, keys in lexicographic order.
  pub fn cache_key(&self) -> String {
    let mut fields: Vec<(&str, Value)> = vec![("page", self.page.into())];
    if let Some(department) = self.department_id {
      fields.push(("departmentId", department.into()));
    }
    if let Some(q) = &self.q {
      fields.push(("q", q.as_str().into()));
    }
    if let Some(has_images) = self.has_images {
      fields.push(("hasImages", has_images.into()));
    }
    if let Some(search_by) = self.search_by {
      fields.push(("searchBy", search_by.into()));
    }
    if let Some(is_highlight) = self.is_highlight {
      fields.push(("isHighlight", is_highlight.into()));
    }
    if let Some(open_access) = self.open_access {
      fields.push(("openAccess", open_access.into()));
    }

    // Insert in sorted order so the output does not depend on the map type
    fields.sort_by(|a, b| a.0.cmp(b.0));
    let map: Map<String, Value> = fields
      .into_iter()
      .map(|(k, v)| (k.to_string(), v))
      .collect();
    Value::Object(map).to_string()
  }
}

// ============================================================================
// Specialized caches
// ============================================================================

/// Result pages keyed by canonical query key
#[derive(Clone)]
pub struct ObjectListCache {
  store: Arc<ResultCacheStore<ObjectListEntry>>,
}

impl ObjectListCache {
  pub fn new(store: ResultCacheStore<ObjectListEntry>) -> Self {
    Self {
      store: Arc::new(store),
    }
  }

  pub fn get(&self, key: &QueryKey) -> Option<ObjectListEntry> {
    self.store.get(&key.cache_key())
  }

  pub fn contains(&self, key: &QueryKey) -> bool {
    self.store.contains(&key.cache_key())
  }

  /// Store a page; persistence runs in the background.
  pub fn set(&self, key: &QueryKey, entry: ObjectListEntry) {
    self.store.set_detached(key.cache_key(), entry);
  }

  pub fn store(&self) -> &ResultCacheStore<ObjectListEntry> {
    &self.store
  }
}

/// Item details and not-found markers keyed by object id
#[derive(Clone)]
pub struct ObjectDetailCache {
  store: Arc<ResultCacheStore<DetailEntry>>,
}

impl ObjectDetailCache {
  pub fn new(store: ResultCacheStore<DetailEntry>) -> Self {
    Self {
      store: Arc::new(store),
    }
  }

  pub fn get(&self, id: u64) -> Option<DetailEntry> {
    self.store.get(&id.to_string())
  }

  /// Store a detail; persistence runs in the background.
  pub fn set(&self, id: u64, entry: DetailEntry) {
    self.store.set_detached(id.to_string(), entry);
  }

  pub fn mark_not_found(&self, id: u64) {
    self.set(id, Lookup::NotFound);
  }

  pub fn store(&self) -> &ResultCacheStore<DetailEntry> {
    &self.store
  }
}

/// Both catalog caches, sharing one backend and policy
#[derive(Clone)]
pub struct CatalogCaches {
  pub lists: ObjectListCache,
  pub details: ObjectDetailCache,
}

impl CatalogCaches {
  pub fn new(backend: Arc<dyn StorageBackend>, policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
    Self {
      lists: ObjectListCache::new(ResultCacheStore::new(
        OBJECT_LIST_STORE,
        Arc::clone(&backend),
        policy,
        Arc::clone(&clock),
      )),
      details: ObjectDetailCache::new(ResultCacheStore::new(
        OBJECT_DETAIL_STORE,
        backend,
        policy,
        clock,
      )),
    }
  }

  /// Persist both stores synchronously, e.g. before exit
  pub fn flush(&self) {
    self.lists.store().flush();
    self.details.store().flush();
  }

  pub fn reset(&self) {
    self.lists.store().reset();
    self.details.store().reset();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, SystemClock};
  use crate::met::types::ObjectRecord;
  use crate::query::SearchBy;
  use proptest::prelude::*;

  fn caches(backend: Arc<dyn StorageBackend>) -> CatalogCaches {
    CatalogCaches::new(backend, CachePolicy::default(), Arc::new(SystemClock))
  }

  #[test]
  fn test_key_omits_unset_fields() {
    let key = QueryKey::for_params(&QueryParams {
      page: 1,
      query: Some("vase".to_string()),
      ..QueryParams::default()
    });
    assert_eq!(key.cache_key(), r#"{"page":1,"q":"vase"}"#);
  }

  #[test]
  fn test_key_sorted_and_normalized() {
    let key = QueryKey::for_params(&QueryParams {
      page: 2,
      department_id: Some(6),
      query: Some("".to_string()),
      search_by: SearchBy::ObjectId,
      has_images: Some(true),
      is_highlight: Some(false),
      open_access: Some(true),
      is_on_view: Some(true),
    });
    assert_eq!(
      key.cache_key(),
      r#"{"departmentId":6,"hasImages":true,"isHighlight":false,"openAccess":true,"page":2,"q":"","searchBy":"objectId"}"#
    );

    let no_department = QueryKey::for_params(&QueryParams {
      page: 1,
      department_id: Some(0),
      ..QueryParams::default()
    });
    assert_eq!(no_department.cache_key(), r#"{"page":1}"#);
  }

  #[derive(Debug, Clone)]
  enum Setter {
    Department(u64),
    Query(String),
    Images(bool),
    Highlight(bool),
    OpenAccess(bool),
    Title,
  }

  fn apply(params: &mut QueryParams, setter: &Setter) {
    match setter {
      Setter::Department(d) => params.department_id = Some(*d),
      Setter::Query(q) => params.query = Some(q.clone()),
      Setter::Images(v) => params.has_images = Some(*v),
      Setter::Highlight(v) => params.is_highlight = Some(*v),
      Setter::OpenAccess(v) => params.open_access = Some(*v),
      Setter::Title => params.search_by = SearchBy::Title,
    }
  }

  fn setters() -> impl Strategy<Value = Vec<Setter>> {
    (
      1u64..30,
      "[a-z ]{0,12}",
      any::<bool>(),
      any::<bool>(),
      any::<bool>(),
    )
      .prop_map(|(d, q, images, highlight, open)| {
        vec![
          Setter::Department(d),
          Setter::Query(q),
          Setter::Images(images),
          Setter::Highlight(highlight),
          Setter::OpenAccess(open),
          Setter::Title,
        ]
      })
  }

  proptest! {
    #[test]
    fn prop_key_independent_of_construction_order(
      page in 1u32..50,
      setters in setters(),
      shuffled in any::<u64>(),
      take in 0usize..=6,
    ) {
      let chosen: Vec<Setter> = setters.into_iter().take(take).collect();
      let mut reordered = chosen.clone();
      let len = reordered.len().max(1);
      reordered.rotate_left((shuffled as usize) % len);
      reordered.reverse();

      let mut a = QueryParams { page, ..QueryParams::default() };
      let mut b = QueryParams { page, ..QueryParams::default() };
      chosen.iter().for_each(|s| apply(&mut a, s));
      reordered.iter().for_each(|s| apply(&mut b, s));

      let key_a = QueryKey::for_params(&a).cache_key();
      let key_b = QueryKey::for_params(&b).cache_key();
      prop_assert_eq!(&key_a, &key_b);

      let parsed: Map<String, Value> = serde_json::from_str(&key_a).unwrap();
      let keys: Vec<&String> = parsed.keys().collect();
      let mut sorted = keys.clone();
      sorted.sort();
      prop_assert_eq!(keys, sorted);
    }
  }

  #[tokio::test]
  async fn test_detail_cache_keeps_not_found_markers() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let caches = caches(backend);

    assert_eq!(caches.details.get(9999), None);
    caches.details.mark_not_found(9999);
    caches
      .details
      .set(1, Lookup::Found(ObjectRecord::new(1, "Cup")));

    assert_eq!(caches.details.get(9999), Some(Lookup::NotFound));
    assert!(caches.details.get(1).unwrap().is_found());
  }

  #[tokio::test]
  async fn test_flush_and_reload_share_backend() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let key = QueryKey {
      page: 1,
      q: Some("vase".to_string()),
      ..QueryKey::default()
    };

    let first = caches(backend.clone());
    first.lists.set(
      &key,
      ObjectListEntry {
        details: vec![Lookup::NotFound],
        total: 1,
      },
    );
    first.flush();
    assert!(backend.read(OBJECT_LIST_STORE).unwrap().is_some());

    let second = caches(backend.clone());
    assert!(second.lists.contains(&key));

    second.reset();
    assert!(!second.lists.contains(&key));
    assert_eq!(backend.read(OBJECT_LIST_STORE).unwrap(), None);
  }
}
