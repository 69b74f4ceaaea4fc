use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A validated catalog item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
  pub object_id: u64,
  pub object_name: String,
  pub title: String,
  #[serde(default)]
  pub is_highlight: bool,
  #[serde(default)]
  pub is_public_domain: bool,
  pub accession_number: Option<String>,
  pub accession_year: Option<String>,
  pub primary_image: Option<String>,
  pub primary_image_small: Option<String>,
  #[serde(default)]
  pub additional_images: Vec<String>,
  #[serde(default)]
  pub constituents: Vec<Constituent>,
  pub department: Option<String>,
  pub culture: Option<String>,
  pub period: Option<String>,
  pub dynasty: Option<String>,
  pub artist_display_name: Option<String>,
  pub artist_display_bio: Option<String>,
  pub artist_nationality: Option<String>,
  pub artist_begin_date: Option<String>,
  pub artist_end_date: Option<String>,
  pub object_date: Option<String>,
  pub object_begin_date: Option<i64>,
  pub object_end_date: Option<i64>,
  pub medium: Option<String>,
  pub dimensions: Option<String>,
  pub credit_line: Option<String>,
  pub country: Option<String>,
  pub region: Option<String>,
  pub classification: Option<String>,
  pub object_url: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub is_timeline_work: bool,
  pub gallery_number: Option<String>,
  pub repository: Option<String>,
  pub metadata_date: Option<DateTime<Utc>>,
}

impl ObjectRecord {
  /// Minimal record, the rest of the fields unset
  #[cfg(test)]
  pub fn new(object_id: u64, title: impl Into<String>) -> Self {
    Self {
      object_id,
      object_name: String::new(),
      title: title.into(),
      is_highlight: false,
      is_public_domain: false,
      accession_number: None,
      accession_year: None,
      primary_image: None,
      primary_image_small: None,
      additional_images: Vec::new(),
      constituents: Vec::new(),
      department: None,
      culture: None,
      period: None,
      dynasty: None,
      artist_display_name: None,
      artist_display_bio: None,
      artist_nationality: None,
      artist_begin_date: None,
      artist_end_date: None,
      object_date: None,
      object_begin_date: None,
      object_end_date: None,
      medium: None,
      dimensions: None,
      credit_line: None,
      country: None,
      region: None,
      classification: None,
      object_url: None,
      tags: Vec::new(),
      is_timeline_work: false,
      gallery_number: None,
      repository: None,
      metadata_date: None,
    }
  }

  /// Whether the item sits in a gallery right now.
  ///
  /// The search endpoint cannot filter on this, so it is decided from the
  /// gallery number of already fetched records: "" and "0" mean off view.
  pub fn is_on_display(&self) -> bool {
    self
      .gallery_number
      .as_deref()
      .map(str::trim)
      .is_some_and(|g| !g.is_empty() && g != "0")
  }

  /// Artist name, falling back to culture for anonymous works
  pub fn artist(&self) -> Option<&str> {
    self
      .artist_display_name
      .as_deref()
      .or(self.culture.as_deref())
  }
}

/// Artist or maker associated with an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constituent {
  pub constituent_id: i64,
  pub role: String,
  pub name: String,
  pub gender: Option<String>,
}

/// Curatorial department
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
  pub id: u64,
  pub display_name: String,
}

/// Ordered id list returned by the listing and search endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
  pub total: u64,
  pub ids: Option<Vec<u64>>,
}

impl SearchResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn ids(&self) -> &[u64] {
    self.ids.as_deref().unwrap_or_default()
  }
}

/// Outcome of a lookup that can be confirmed absent.
///
/// `NotFound` is also what the detail cache stores for ids the remote reported
/// missing, so it is distinct from "never looked up".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Lookup<T> {
  Found(T),
  NotFound,
}

impl<T> Lookup<T> {
  pub fn found(&self) -> Option<&T> {
    match self {
      Lookup::Found(value) => Some(value),
      Lookup::NotFound => None,
    }
  }

  #[cfg(test)]
  pub fn is_found(&self) -> bool {
    matches!(self, Lookup::Found(_))
  }
}

/// A detail cache value: a record or a confirmed-missing marker
pub type DetailEntry = Lookup<ObjectRecord>;

/// One cached page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectListEntry {
  pub details: Vec<DetailEntry>,
  pub total: u64,
}

impl ObjectListEntry {
  /// A page is complete once it holds details or the remote confirmed zero results.
  /// Anything else only carries a total.
  pub fn is_complete(&self) -> bool {
    !self.details.is_empty() || self.total == 0
  }
}

/// Filter for the plain id listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdFilter {
  pub department_id: Option<u64>,
  /// Only objects updated after this date
  pub metadata_date: Option<NaiveDate>,
}

/// Parameters of the search endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
  /// Free text, required
  pub q: String,
  pub department_id: Option<u64>,
  pub is_highlight: Option<bool>,
  /// Limit matches to titles
  pub title: Option<bool>,
  pub is_on_view: Option<bool>,
  pub is_public_domain: Option<bool>,
  pub artist_or_culture: Option<bool>,
  pub medium: Vec<String>,
  /// Unset means `true`
  pub has_images: Option<bool>,
  pub geo_location: Option<String>,
  pub date_begin: Option<i32>,
  pub date_end: Option<i32>,
}

impl SearchParams {
  #[cfg(test)]
  pub fn new(q: impl Into<String>) -> Self {
    Self {
      q: q.into(),
      ..Self::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_on_display() {
    let mut record = ObjectRecord::new(1, "Vase");
    assert!(!record.is_on_display());

    record.gallery_number = Some("0".to_string());
    assert!(!record.is_on_display());

    record.gallery_number = Some("  ".to_string());
    assert!(!record.is_on_display());

    record.gallery_number = Some("171".to_string());
    assert!(record.is_on_display());
  }

  #[test]
  fn test_detail_entry_serialization_is_tagged() {
    let marker: DetailEntry = Lookup::NotFound;
    let json = serde_json::to_value(&marker).unwrap();
    assert_eq!(json, serde_json::json!({ "kind": "not_found" }));

    let found: DetailEntry = Lookup::Found(ObjectRecord::new(7, "Cup"));
    let json = serde_json::to_string(&found).unwrap();
    let back: DetailEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(back, found);
  }

  #[test]
  fn test_list_entry_completeness() {
    let partial = ObjectListEntry {
      details: Vec::new(),
      total: 60,
    };
    assert!(!partial.is_complete());

    let confirmed_empty = ObjectListEntry {
      details: Vec::new(),
      total: 0,
    };
    assert!(confirmed_empty.is_complete());
  }
}
