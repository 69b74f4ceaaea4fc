//! Query parameters supplied by the UI and the state it reads back.
//!
//! Inspired by TanStack Query: the UI only ever sees a [`QueryView`], a
//! snapshot of loading/result/error state for the current parameters.

use std::ops::Range;

use crate::met::error::ApiError;
use crate::met::types::{DetailEntry, IdFilter, ObjectRecord, SearchParams};

/// Results per page
pub const PAGE_SIZE: usize = 25;

/// Query used when only flags are set
const MATCH_ALL: &str = "*";

/// Which field the free-text query targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SearchBy {
  #[default]
  All,
  ObjectId,
  Title,
}

impl SearchBy {
  /// Value stored in the canonical key; `All` is left out
  pub fn key_value(self) -> Option<&'static str> {
    match self {
      SearchBy::All => None,
      SearchBy::ObjectId => Some("objectId"),
      SearchBy::Title => Some("title"),
    }
  }
}

/// Everything the UI controls: page, filters and query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
  pub page: u32,
  pub department_id: Option<u64>,
  /// `None` means "not searched yet", `Some("")` means the user cleared it
  pub query: Option<String>,
  pub search_by: SearchBy,
  pub has_images: Option<bool>,
  pub is_highlight: Option<bool>,
  /// Public-domain items only
  pub open_access: Option<bool>,
  /// Applied client-side to fetched details
  pub is_on_view: Option<bool>,
}

impl QueryParams {
  /// Page number, treating 0 as the first page
  pub fn page(&self) -> u32 {
    self.page.max(1)
  }

  pub fn with_page(&self, page: u32) -> Self {
    Self {
      page,
      ..self.clone()
    }
  }

  /// The query was explicitly cleared
  pub fn is_cleared(&self) -> bool {
    self.query.as_deref() == Some("")
  }

  /// Trimmed query text, if any is left after trimming
  pub fn search_text(&self) -> Option<&str> {
    self
      .query
      .as_deref()
      .map(str::trim)
      .filter(|q| !q.is_empty())
  }

  /// Id for a direct single-item lookup.
  ///
  /// Only when searching by object id with an all-digit query; zero or an
  /// out-of-range number is a validation error.
  pub fn direct_object_id(&self) -> Option<Result<u64, ApiError>> {
    if self.search_by != SearchBy::ObjectId {
      return None;
    }
    let text = self.search_text()?;
    if !text.bytes().all(|b| b.is_ascii_digit()) {
      return None;
    }

    let parsed = text
      .parse::<u64>()
      .ok()
      .filter(|id| *id > 0)
      .ok_or_else(|| {
        ApiError::Validation(format!(
          "Invalid object ID: {}. A positive integer is required.",
          text
        ))
      });
    Some(parsed)
  }

  /// Any filter that makes browsing go through the search endpoint.
  ///
  /// `is_on_view` is not one: it only narrows what is shown, so it must not
  /// change which ids are fetched under a key that leaves it out.
  pub fn has_filter_flags(&self) -> bool {
    self.has_images.is_some() || self.is_highlight.is_some() || self.open_access.is_some()
  }

  /// Whether ids come from the search endpoint rather than the plain listing
  pub fn uses_search(&self) -> bool {
    self.search_text().is_some() || self.has_filter_flags()
  }

  pub fn search_params(&self) -> SearchParams {
    SearchParams {
      q: self.search_text().unwrap_or(MATCH_ALL).to_string(),
      department_id: self.department_id.filter(|d| *d > 0),
      is_highlight: self.is_highlight,
      title: (self.search_by == SearchBy::Title).then_some(true),
      is_public_domain: self.open_access,
      has_images: self.has_images,
      ..SearchParams::default()
    }
  }

  pub fn id_filter(&self) -> IdFilter {
    IdFilter {
      department_id: self.department_id.filter(|d| *d > 0),
      metadata_date: None,
    }
  }
}

/// Index range of `page` over a list of `len` ids, clipped to the list.
pub fn page_window(page: u32, len: usize) -> Range<usize> {
  let page = page.max(1) as usize;
  let start = (page - 1).saturating_mul(PAGE_SIZE).min(len);
  let end = start.saturating_add(PAGE_SIZE).min(len);
  start..end
}

/// The state of a query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryState {
  /// No parameters applied yet
  #[default]
  Idle,
  /// Fetching
  Loading,
  /// At least one result
  Ready,
  /// Zero results, or the query was cleared
  Empty,
  /// The single requested object does not exist
  NotFound,
  /// Fetch failed
  Error(String),
}

/// Snapshot of what the UI renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryView {
  pub state: QueryState,
  pub page: u32,
  /// Total results across pages; a cached hint while loading
  pub total: u64,
  /// Details of the current page, including not-found markers
  pub details: Vec<DetailEntry>,
  /// Show only records currently in a gallery
  pub on_view_only: bool,
}

impl QueryView {
  #[cfg(test)]
  pub fn is_loading(&self) -> bool {
    matches!(self.state, QueryState::Loading)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self.state, QueryState::Ready)
  }

  pub fn is_empty(&self) -> bool {
    matches!(self.state, QueryState::Empty)
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self.state, QueryState::NotFound)
  }

  pub fn error(&self) -> Option<&str> {
    match &self.state {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }

  /// Records to display: markers dropped, on-view narrowing applied.
  ///
  /// Narrowing only changes what is shown; `total` keeps the remote count.
  pub fn visible_records(&self) -> Vec<&ObjectRecord> {
    self
      .details
      .iter()
      .filter_map(|d| d.found())
      .filter(|r| !self.on_view_only || r.is_on_display())
      .collect()
  }

  pub fn page_count(&self) -> u64 {
    self.total.div_ceil(PAGE_SIZE as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::met::types::Lookup;
  use proptest::prelude::*;

  #[test]
  fn test_page_window_examples() {
    assert_eq!(page_window(1, 60), 0..25);
    assert_eq!(page_window(3, 60), 50..60);
    assert_eq!(page_window(4, 60), 60..60);
    assert_eq!(page_window(0, 10), 0..10);
  }

  proptest! {
    #[test]
    fn prop_page_window_matches_slice(page in 1u32..20, len in 0usize..500) {
      let window = page_window(page, len);
      let start = ((page as usize - 1) * PAGE_SIZE).min(len);
      let end = (page as usize * PAGE_SIZE).min(len);
      prop_assert_eq!(window, start..end);
    }
  }

  #[test]
  fn test_direct_object_id() {
    let params = QueryParams {
      query: Some(" 9999 ".to_string()),
      search_by: SearchBy::ObjectId,
      ..QueryParams::default()
    };
    assert_eq!(params.direct_object_id(), Some(Ok(9999)));

    let zero = QueryParams {
      query: Some("0".to_string()),
      ..params.clone()
    };
    let rejected = zero.direct_object_id().unwrap();
    assert!(rejected.unwrap_err().is_validation());

    let text = QueryParams {
      query: Some("vase".to_string()),
      ..params.clone()
    };
    assert_eq!(text.direct_object_id(), None);

    let all = QueryParams {
      search_by: SearchBy::All,
      ..params
    };
    assert_eq!(all.direct_object_id(), None);
  }

  #[test]
  fn test_search_params_mapping() {
    let params = QueryParams {
      query: None,
      search_by: SearchBy::Title,
      department_id: Some(0),
      open_access: Some(true),
      ..QueryParams::default()
    };
    let search = params.search_params();
    assert_eq!(search.q, "*");
    assert_eq!(search.title, Some(true));
    assert_eq!(search.department_id, None);
    assert_eq!(search.is_public_domain, Some(true));
    assert_eq!(search.is_on_view, None);
    assert!(params.uses_search());
    assert!(!QueryParams::default().uses_search());

    let on_view = QueryParams {
      is_on_view: Some(true),
      ..QueryParams::default()
    };
    assert!(!on_view.uses_search());
    assert_eq!(on_view.search_params().is_on_view, None);
  }

  #[test]
  fn test_visible_records_filters_markers_and_off_view() {
    let mut shown = crate::met::types::ObjectRecord::new(1, "On view");
    shown.gallery_number = Some("131".to_string());
    let hidden = crate::met::types::ObjectRecord::new(2, "In storage");

    let mut view = QueryView {
      state: QueryState::Ready,
      page: 1,
      total: 3,
      details: vec![Lookup::Found(shown), Lookup::NotFound, Lookup::Found(hidden)],
      on_view_only: false,
    };
    assert_eq!(view.visible_records().len(), 2);

    view.on_view_only = true;
    let visible = view.visible_records();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].object_id, 1);
    assert_eq!(view.total, 3);
  }
}
