//! Error types for the collection client.

use thiserror::Error;

/// Longest slice of a response body kept for diagnostics.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Failure of a collection API call.
///
/// A confirmed-missing object is not an error: it is reported as
/// [`Lookup::NotFound`](super::types::Lookup::NotFound).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  /// Malformed caller input, rejected before any I/O
  #[error("Invalid request: {0}")]
  Validation(String),

  /// Non-success status other than 404
  #[error("API Error {status}: {message}")]
  Status {
    status: u16,
    message: String,
    /// Raw body, truncated
    body: String,
  },

  /// Network or transport failure
  #[error("Network or fetch error: {0}")]
  Transport(String),

  /// Response did not match the expected shape
  #[error("Invalid response from {endpoint}: {reason}")]
  InvalidResponse { endpoint: String, reason: String },
}

impl ApiError {
  pub fn is_validation(&self) -> bool {
    matches!(self, ApiError::Validation(_))
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(e: reqwest::Error) -> Self {
    ApiError::Transport(e.to_string())
  }
}

/// Keep at most [`MAX_ERROR_BODY_CHARS`] characters of a body.
pub fn truncate_body(body: &str) -> String {
  body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
