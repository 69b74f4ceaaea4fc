//! Serde-deserializable types matching collection API responses.
//!
//! These types are separate from domain types so deserialization can stay
//! permissive while the decoders below enforce the field-level contract once,
//! at the boundary.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::types::{Constituent, Department, ObjectRecord, SearchResult};

// ============================================================================
// Listing and search endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiObjectListResponse {
  pub total: i64,
  #[serde(rename = "objectIDs")]
  pub object_ids: Option<Vec<i64>>,
}

// ============================================================================
// Departments endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiDepartment {
  #[serde(rename = "departmentId")]
  pub department_id: i64,
  #[serde(rename = "displayName")]
  pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiDepartmentsResponse {
  pub departments: Vec<ApiDepartment>,
}

// ============================================================================
// Object endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiConstituent {
  #[serde(rename = "constituentID")]
  pub constituent_id: i64,
  pub role: String,
  pub name: String,
  pub gender: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTag {
  pub term: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiObject {
  #[serde(rename = "objectID")]
  pub object_id: i64,
  pub object_name: String,
  pub title: String,
  pub is_highlight: Option<bool>,
  pub accession_number: Option<String>,
  pub accession_year: Option<String>,
  pub is_public_domain: Option<bool>,
  pub primary_image: Option<String>,
  pub primary_image_small: Option<String>,
  pub additional_images: Option<Vec<String>>,
  pub constituents: Option<Vec<ApiConstituent>>,
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
  #[serde(rename = "objectURL")]
  pub object_url: Option<String>,
  pub tags: Option<Vec<ApiTag>>,
  pub is_timeline_work: Option<bool>,
  #[serde(rename = "GalleryNumber")]
  pub gallery_number: Option<String>,
  pub repository: Option<String>,
  pub metadata_date: Option<String>,
}

// ============================================================================
// Decoders
// ============================================================================

/// Decode a listing or search response.
pub fn decode_search_result(value: Value) -> Result<SearchResult, String> {
  let raw: ApiObjectListResponse = serde_json::from_value(value).map_err(|e| e.to_string())?;

  let total = u64::try_from(raw.total)
    .map_err(|_| format!("negative total {}", raw.total))?;
  let ids = raw
    .object_ids
    .map(|ids| {
      ids
        .into_iter()
        .map(positive_id)
        .collect::<Result<Vec<_>, _>>()
    })
    .transpose()?;

  Ok(SearchResult { total, ids })
}

/// Decode the department list.
pub fn decode_departments(value: Value) -> Result<Vec<Department>, String> {
  let raw: ApiDepartmentsResponse = serde_json::from_value(value).map_err(|e| e.to_string())?;

  raw
    .departments
    .into_iter()
    .map(|d| {
      Ok(Department {
        id: positive_id(d.department_id)?,
        display_name: d.display_name,
      })
    })
    .collect()
}

/// Decode a single object, normalizing empty strings in URL fields to `None`.
pub fn decode_object(value: Value) -> Result<ObjectRecord, String> {
  let raw: ApiObject = serde_json::from_value(value).map_err(|e| e.to_string())?;
  raw.into_record()
}

impl ApiObject {
  pub fn into_record(self) -> Result<ObjectRecord, String> {
    let additional_images = self
      .additional_images
      .unwrap_or_default()
      .into_iter()
      .filter_map(|u| normalize_url("additionalImages", Some(u)).transpose())
      .collect::<Result<Vec<_>, _>>()?;

    let metadata_date = self
      .metadata_date
      .filter(|d| !d.trim().is_empty())
      .map(|d| {
        DateTime::parse_from_rfc3339(&d)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| format!("metadataDate: {}", e))
      })
      .transpose()?;

    Ok(ObjectRecord {
      object_id: positive_id(self.object_id)?,
      object_name: self.object_name,
      title: self.title,
      is_highlight: self.is_highlight.unwrap_or(false),
      is_public_domain: self.is_public_domain.unwrap_or(false),
      accession_number: non_empty(self.accession_number),
      accession_year: non_empty(self.accession_year),
      primary_image: normalize_url("primaryImage", self.primary_image)?,
      primary_image_small: normalize_url("primaryImageSmall", self.primary_image_small)?,
      additional_images,
      constituents: self
        .constituents
        .unwrap_or_default()
        .into_iter()
        .map(Constituent::from)
        .collect(),
      department: non_empty(self.department),
      culture: non_empty(self.culture),
      period: non_empty(self.period),
      dynasty: non_empty(self.dynasty),
      artist_display_name: non_empty(self.artist_display_name),
      artist_display_bio: non_empty(self.artist_display_bio),
      artist_nationality: non_empty(self.artist_nationality),
      artist_begin_date: non_empty(self.artist_begin_date),
      artist_end_date: non_empty(self.artist_end_date),
      object_date: non_empty(self.object_date),
      object_begin_date: self.object_begin_date,
      object_end_date: self.object_end_date,
      medium: non_empty(self.medium),
      dimensions: non_empty(self.dimensions),
      credit_line: non_empty(self.credit_line),
      country: non_empty(self.country),
      region: non_empty(self.region),
      classification: non_empty(self.classification),
      object_url: normalize_url("objectURL", self.object_url)?,
      tags: self
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.term)
        .collect(),
      is_timeline_work: self.is_timeline_work.unwrap_or(false),
      gallery_number: self.gallery_number,
      repository: non_empty(self.repository),
      metadata_date,
    })
  }
}

impl From<ApiConstituent> for Constituent {
  fn from(c: ApiConstituent) -> Self {
    Constituent {
      constituent_id: c.constituent_id,
      role: c.role,
      name: c.name,
      gender: non_empty(c.gender),
    }
  }
}

// ============================================================================
// Helpers
// ============================================================================

fn positive_id(id: i64) -> Result<u64, String> {
  u64::try_from(id)
    .ok()
    .filter(|id| *id > 0)
    .ok_or_else(|| format!("expected a positive id, got {}", id))
}

/// The API sends "" for absent text fields
fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.trim().is_empty())
}

/// Absent or empty URLs become `None`; anything else must parse.
fn normalize_url(field: &str, value: Option<String>) -> Result<Option<String>, String> {
  match non_empty(value) {
    None => Ok(None),
    Some(raw) => Url::parse(raw.trim())
      .map(|_| Some(raw.trim().to_string()))
      .map_err(|e| format!("{}: invalid URL '{}': {}", field, raw, e)),
  }
}
