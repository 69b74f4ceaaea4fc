use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::met::api_types::{decode_departments, decode_object, decode_search_result};
use crate::met::error::{truncate_body, ApiError};
use crate::met::types::{Department, IdFilter, Lookup, ObjectRecord, SearchParams, SearchResult};

/// Typed access to the remote catalog.
///
/// Implementations validate every response and never cache.
pub trait CollectionApi: Send + Sync + 'static {
  /// Ids of all objects, optionally narrowed to one department
  fn fetch_ids(
    &self,
    filter: &IdFilter,
  ) -> impl Future<Output = Result<SearchResult, ApiError>> + Send;

  /// One object; 404 is `Lookup::NotFound`
  fn fetch_detail(
    &self,
    id: u64,
  ) -> impl Future<Output = Result<Lookup<ObjectRecord>, ApiError>> + Send;

  /// Ids matching a free-text query and flags
  fn search(
    &self,
    params: &SearchParams,
  ) -> impl Future<Output = Result<SearchResult, ApiError>> + Send;

  fn fetch_departments(&self) -> impl Future<Output = Result<Vec<Department>, ApiError>> + Send;
}

/// Classified response body
#[derive(Debug, PartialEq)]
pub(crate) enum Body {
  Json(Value),
  /// 204 or a blank body
  Empty,
  /// HTTP 404
  NotFound,
}

/// Map a status and raw body to a body or an error.
pub(crate) fn classify(status: u16, text: &str, endpoint: &str) -> Result<Body, ApiError> {
  if status == StatusCode::NOT_FOUND.as_u16() {
    return Ok(Body::NotFound);
  }

  if !(200..300).contains(&status) {
    let message = serde_json::from_str::<Value>(text)
      .ok()
      .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
      .unwrap_or_else(|| {
        StatusCode::from_u16(status)
          .ok()
          .and_then(|s| s.canonical_reason())
          .unwrap_or("Unknown status")
          .to_string()
      });
    return Err(ApiError::Status {
      status,
      message,
      body: truncate_body(text),
    });
  }

  if status == StatusCode::NO_CONTENT.as_u16() || text.trim().is_empty() {
    return Ok(Body::Empty);
  }

  serde_json::from_str(text)
    .map(Body::Json)
    .map_err(|e| ApiError::InvalidResponse {
      endpoint: endpoint.to_string(),
      reason: format!("body is not JSON: {}", e),
    })
}

/// Build the listing URL.
pub(crate) fn ids_url(base: &str, filter: &IdFilter) -> Result<Url, ApiError> {
  let mut url = endpoint_url(base, "/objects")?;
  {
    let mut query = url.query_pairs_mut();
    if let Some(department) = filter.department_id.filter(|d| *d > 0) {
      query.append_pair("departmentIds", &department.to_string());
    }
    if let Some(date) = filter.metadata_date {
      query.append_pair("metadataDate", &date.format("%Y-%m-%d").to_string());
    }
  }
  Ok(strip_empty_query(url))
}

/// Build the search URL, validating the parameters first.
pub(crate) fn search_url(base: &str, params: &SearchParams) -> Result<Url, ApiError> {
  let q = params.q.trim();
  if q.is_empty() {
    return Err(ApiError::Validation(
      "Search query parameter 'q' is required and cannot be empty.".to_string(),
    ));
  }
  if let (Some(begin), Some(end)) = (params.date_begin, params.date_end) {
    if begin > end {
      return Err(ApiError::Validation(format!(
        "dateBegin {} is after dateEnd {}",
        begin, end
      )));
    }
  }

  let mut url = endpoint_url(base, "/search")?;
  {
    let mut query = url.query_pairs_mut();
    query.append_pair("q", q);

    if let Some(department) = params.department_id.filter(|d| *d > 0) {
      query.append_pair("departmentId", &department.to_string());
    }
    let flags = [
      ("isHighlight", params.is_highlight),
      ("title", params.title),
      ("isOnView", params.is_on_view),
      ("isPublicDomain", params.is_public_domain),
      ("artistOrCulture", params.artist_or_culture),
    ];
    for (name, value) in flags {
      if let Some(value) = value {
        query.append_pair(name, &value.to_string());
      }
    }

    let medium = params
      .medium
      .iter()
      .map(|m| m.trim())
      .filter(|m| !m.is_empty())
      .collect::<Vec<_>>()
      .join("|");
    if !medium.is_empty() {
      query.append_pair("medium", &medium);
    }

    // Biased toward items with viewable images unless told otherwise
    query.append_pair("hasImages", &params.has_images.unwrap_or(true).to_string());

    if let Some(geo) = params.geo_location.as_deref().map(str::trim) {
      if !geo.is_empty() {
        query.append_pair("geoLocation", geo);
      }
    }
    if let Some(begin) = params.date_begin {
      query.append_pair("dateBegin", &begin.to_string());
    }
    if let Some(end) = params.date_end {
      query.append_pair("dateEnd", &end.to_string());
    }
  }
  Ok(url)
}

fn endpoint_url(base: &str, path: &str) -> Result<Url, ApiError> {
  Url::parse(&format!("{}{}", base.trim_end_matches('/'), path))
    .map_err(|e| ApiError::Validation(format!("Invalid API URL '{}{}': {}", base, path, e)))
}

fn strip_empty_query(mut url: Url) -> Url {
  if url.query() == Some("") {
    url.set_query(None);
  }
  url
}

/// Met Museum collection API client
#[derive(Clone)]
pub struct MetClient {
  http: reqwest::Client,
  base_url: String,
}

impl MetClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL '{}': {}", config.base_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(config.user_agent.clone())
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: config.base_url.trim_end_matches('/').to_string(),
    })
  }

  /// GET a URL and classify the response
  async fn get(&self, url: Url) -> Result<Body, ApiError> {
    let endpoint = url.path().to_string();
    debug!("GET {}", url);

    let response = self.http.get(url).send().await?;
    let status = response.status().as_u16();
    let text = response.text().await?;

    classify(status, &text, &endpoint)
  }

  /// Listing and search share the same response shape and treat a missing
  /// resource as an empty result.
  async fn get_id_list(&self, url: Url) -> Result<SearchResult, ApiError> {
    let endpoint = url.path().to_string();
    match self.get(url).await? {
      Body::NotFound | Body::Empty => Ok(SearchResult::empty()),
      Body::Json(value) => decode_search_result(value).map_err(|reason| {
        warn!("Failed to validate response from {}: {}", endpoint, reason);
        ApiError::InvalidResponse { endpoint, reason }
      }),
    }
  }
}

impl CollectionApi for MetClient {
  async fn fetch_ids(&self, filter: &IdFilter) -> Result<SearchResult, ApiError> {
    let url = ids_url(&self.base_url, filter)?;
    self.get_id_list(url).await
  }

  async fn fetch_detail(&self, id: u64) -> Result<Lookup<ObjectRecord>, ApiError> {
    if id == 0 {
      return Err(ApiError::Validation(
        "Invalid object ID: 0. A positive integer is required.".to_string(),
      ));
    }

    let url = endpoint_url(&self.base_url, &format!("/objects/{}", id))?;
    let endpoint = url.path().to_string();

    match self.get(url).await? {
      Body::NotFound => Ok(Lookup::NotFound),
      Body::Empty => Err(ApiError::InvalidResponse {
        endpoint,
        reason: "empty body".to_string(),
      }),
      Body::Json(value) => decode_object(value)
        .map(Lookup::Found)
        .map_err(|reason| {
          warn!("Failed to validate object {}: {}", id, reason);
          ApiError::InvalidResponse { endpoint, reason }
        }),
    }
  }

  async fn search(&self, params: &SearchParams) -> Result<SearchResult, ApiError> {
    let url = search_url(&self.base_url, params)?;
    self.get_id_list(url).await
  }

  async fn fetch_departments(&self) -> Result<Vec<Department>, ApiError> {
    let url = endpoint_url(&self.base_url, "/departments")?;
    let endpoint = url.path().to_string();

    match self.get(url).await? {
      Body::NotFound | Body::Empty => Ok(Vec::new()),
      Body::Json(value) => decode_departments(value).map_err(|reason| {
        warn!("Failed to validate departments: {}", reason);
        ApiError::InvalidResponse { endpoint, reason }
      }),
    }
  }
}
