//! Decides between cache and remote for every parameter change.
//!
//! The orchestrator owns the visible [`QueryView`]. Each [`update`] takes a
//! generation number; any result that arrives after a newer update (or after
//! [`teardown`]) is dropped before it can touch the view.
//!
//! [`update`]: QueryOrchestrator::update
//! [`teardown`]: QueryOrchestrator::teardown

use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::met::cache::{CatalogCaches, QueryKey};
use crate::met::client::CollectionApi;
use crate::met::error::ApiError;
use crate::met::types::{Department, DetailEntry, Lookup, ObjectListEntry};
use crate::query::{page_window, QueryParams, QueryState, QueryView};

type DetailFuture = Shared<BoxFuture<'static, Result<DetailEntry, ApiError>>>;

/// A page assembled from the remote
struct FetchedPage {
  entry: ObjectListEntry,
  /// Some details failed and were replaced by markers
  degraded: bool,
}

struct Current {
  params: Option<QueryParams>,
  view: QueryView,
}

pub struct QueryOrchestrator<C: CollectionApi> {
  client: Arc<C>,
  caches: CatalogCaches,
  in_flight: Arc<Mutex<HashMap<u64, DetailFuture>>>,
  current: Mutex<Current>,
  generation: AtomicU64,
  closed: AtomicBool,
}

impl<C: CollectionApi> QueryOrchestrator<C> {
  pub fn new(client: Arc<C>, caches: CatalogCaches) -> Self {
    Self {
      client,
      caches,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      current: Mutex::new(Current {
        params: None,
        view: QueryView::default(),
      }),
      generation: AtomicU64::new(0),
      closed: AtomicBool::new(false),
    }
  }

  pub fn caches(&self) -> &CatalogCaches {
    &self.caches
  }

  /// Current view, cloned
  pub fn snapshot(&self) -> QueryView {
    self.lock_current().view.clone()
  }

  /// Apply new parameters and resolve them, returning the view afterwards.
  ///
  /// If another update starts before this one finishes, this one's results
  /// are discarded and the returned view reflects the newer update.
  pub async fn update(&self, params: QueryParams) -> QueryView {
    if self.closed.load(Ordering::SeqCst) {
      return self.snapshot();
    }
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    self.lock_current().params = Some(params.clone());

    let page = params.page();
    let on_view_only = params.is_on_view == Some(true);

    if params.is_cleared() {
      debug!("Query cleared, nothing to fetch");
      self.apply(generation, |view| {
        *view = QueryView {
          state: QueryState::Empty,
          page,
          on_view_only,
          ..QueryView::default()
        };
      });
      return self.snapshot();
    }

    let direct = match params.direct_object_id() {
      Some(Ok(id)) => Some(id),
      Some(Err(e)) => {
        self.apply(generation, |view| {
          *view = QueryView {
            state: QueryState::Error(e.to_string()),
            page,
            on_view_only,
            ..QueryView::default()
          };
        });
        return self.snapshot();
      }
      None => None,
    };

    self.apply(generation, |view| {
      *view = QueryView {
        state: QueryState::Loading,
        page,
        on_view_only,
        ..QueryView::default()
      };
    });

    let key = QueryKey::for_params(&params);
    if let Some(cached) = self.caches.lists.get(&key) {
      if cached.is_complete() {
        debug!("Cache hit for {}", key.cache_key());
        self.settle(generation, direct.is_some(), cached);
        return self.snapshot();
      }
      // Known total but no details: show the total while details load
      debug!("Partial hit for {}, total {}", key.cache_key(), cached.total);
      self.apply(generation, |view| view.total = cached.total);
    }

    let fetched = match direct {
      Some(id) => self.lookup_direct(id).await,
      None => self.fetch_page(&params).await,
    };

    match fetched {
      Ok(fetched) => {
        self.write_back(&key, &fetched);
        self.settle(generation, direct.is_some(), fetched.entry);
      }
      Err(e) => {
        warn!("Query failed: {}", e);
        let message = e.to_string();
        self.apply(generation, |view| {
          view.state = QueryState::Error(message);
          view.total = 0;
          view.details.clear();
        });
      }
    }

    self.snapshot()
  }

  /// Detail of a single object, for the item view.
  pub async fn object_detail(&self, id: u64) -> Result<DetailEntry, ApiError> {
    if id == 0 {
      return Err(ApiError::Validation(
        "Invalid object ID: 0. A positive integer is required.".to_string(),
      ));
    }
    self.detail_entry(id).await
  }

  /// Load a page of the current query into the cache without touching the view.
  pub async fn prefetch_page(&self, page: u32) {
    let Some(params) = self.lock_current().params.clone() else {
      return;
    };
    let params = params.with_page(page);
    if params.is_cleared() || params.direct_object_id().is_some() {
      return;
    }

    let key = QueryKey::for_params(&params);
    if self.caches.lists.contains(&key) {
      debug!("Prefetch of {} skipped, already cached", key.cache_key());
      return;
    }

    match self.fetch_page(&params).await {
      Ok(fetched) => self.write_back(&key, &fetched),
      Err(e) => debug!("Prefetch of page {} failed: {}", page, e),
    }
  }

  /// Load one object's detail into the cache.
  pub async fn prefetch_detail(&self, id: u64) {
    if id == 0 {
      return;
    }
    if let Err(e) = self.detail_entry(id).await {
      debug!("Prefetch of object {} failed: {}", id, e);
    }
  }

  /// Department list, straight from the remote
  pub async fn departments(&self) -> Result<Vec<Department>, ApiError> {
    self.client.fetch_departments().await
  }

  /// Stop accepting results. Fetches still running complete, but nothing they
  /// return reaches the view or the list cache.
  pub fn teardown(&self) {
    info!("Orchestrator torn down");
    self.closed.store(true, Ordering::SeqCst);
    self.generation.fetch_add(1, Ordering::SeqCst);
    self.lock_in_flight().clear();
  }

  async fn lookup_direct(&self, id: u64) -> Result<FetchedPage, ApiError> {
    let entry = match self.detail_entry(id).await? {
      found @ Lookup::Found(_) => ObjectListEntry {
        details: vec![found],
        total: 1,
      },
      Lookup::NotFound => ObjectListEntry {
        details: Vec::new(),
        total: 0,
      },
    };
    Ok(FetchedPage {
      entry,
      degraded: false,
    })
  }

  /// Resolve the id list, slice out the page and resolve its details.
  async fn fetch_page(&self, params: &QueryParams) -> Result<FetchedPage, ApiError> {
    let result = if params.uses_search() {
      self.client.search(&params.search_params()).await?
    } else {
      self.client.fetch_ids(&params.id_filter()).await?
    };

    let ids = result.ids();
    let page_ids = &ids[page_window(params.page(), ids.len())];
    debug!(
      "Resolving page {} ({} of {} ids)",
      params.page(),
      page_ids.len(),
      result.total
    );

    let lookups = page_ids.iter().map(|id| self.detail_entry(*id));
    let resolved = future::join_all(lookups).await;

    let mut degraded = false;
    let details = page_ids
      .iter()
      .zip(resolved)
      .map(|(id, outcome)| match outcome {
        Ok(entry) => entry,
        Err(e) => {
          warn!("Failed to fetch object {}: {}", id, e);
          degraded = true;
          Lookup::NotFound
        }
      })
      .collect();

    Ok(FetchedPage {
      entry: ObjectListEntry {
        details,
        total: result.total,
      },
      degraded,
    })
  }

  /// Cache-first detail lookup, sharing one remote fetch per id.
  fn detail_entry(&self, id: u64) -> DetailFuture {
    let mut in_flight = self.lock_in_flight();
    if let Some(pending) = in_flight.get(&id) {
      return pending.clone();
    }
    // Checked under the lock so a fetch finishing right now is not repeated
    if let Some(cached) = self.caches.details.get(id) {
      return future::ready(Ok(cached)).boxed().shared();
    }

    let client = Arc::clone(&self.client);
    let details = self.caches.details.clone();
    let registry = Arc::clone(&self.in_flight);
    let fetch = async move {
      let result = client.fetch_detail(id).await;
      match &result {
        Ok(Lookup::NotFound) => details.mark_not_found(id),
        Ok(entry) => details.set(id, entry.clone()),
        Err(e) => debug!("Detail {} not cached: {}", id, e),
      }
      registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&id);
      result
    }
    .boxed()
    .shared();

    in_flight.insert(id, fetch.clone());
    fetch
  }

  /// Store a page once it is complete and every item resolved.
  fn write_back(&self, key: &QueryKey, fetched: &FetchedPage) {
    if self.closed.load(Ordering::SeqCst) {
      return;
    }
    if fetched.degraded {
      debug!("Not caching {}: some items failed", key.cache_key());
      return;
    }
    if !fetched.entry.is_complete() {
      debug!("Not caching {}: no details", key.cache_key());
      return;
    }
    self.caches.lists.set(key, fetched.entry.clone());
  }

  /// Final state for a resolved page.
  fn settle(&self, generation: u64, direct: bool, entry: ObjectListEntry) {
    self.apply(generation, |view| {
      if direct {
        match entry.details.into_iter().next() {
          Some(found @ Lookup::Found(_)) => {
            view.state = QueryState::Ready;
            view.total = 1;
            view.details = vec![found];
          }
          _ => {
            view.state = QueryState::NotFound;
            view.total = 0;
            view.details.clear();
          }
        }
      } else if entry.total == 0 || entry.details.is_empty() {
        view.state = QueryState::Empty;
        view.total = entry.total;
        view.details.clear();
      } else {
        view.state = QueryState::Ready;
        view.total = entry.total;
        view.details = entry.details;
      }
    });
  }

  /// Mutate the view unless `generation` has been superseded.
  fn apply(&self, generation: u64, f: impl FnOnce(&mut QueryView)) -> bool {
    let mut current = self.lock_current();
    if self.closed.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation {
      debug!("Dropping result of superseded query {}", generation);
      return false;
    }
    f(&mut current.view);
    true
  }

  fn lock_current(&self) -> MutexGuard<'_, Current> {
    self.current.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<u64, DetailFuture>> {
    self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
  }
}
