use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{CachePolicy, DEFAULT_CAPACITY};

pub const DEFAULT_BASE_URL: &str = "https://collectionapi.metmuseum.org/public/collection/v1";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Root of the collection API, without a trailing slash
  #[serde(default = "default_base_url")]
  pub base_url: String,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      user_agent: default_user_agent(),
    }
  }
}

fn default_base_url() -> String {
  DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
  format!("metscope/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// SQLite database in the data directory
  #[default]
  Sqlite,
  /// Keep caches for this session only
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: BackendKind,
  /// Database location (default: $XDG_DATA_HOME/metscope/cache.db)
  pub path: Option<PathBuf>,
  #[serde(default = "default_ttl_hours")]
  pub ttl_hours: u64,
  #[serde(default = "default_max_entries")]
  pub max_entries: usize,
  /// Upper bound on persisted bytes across all stores
  pub quota_bytes: Option<usize>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: BackendKind::default(),
      path: None,
      ttl_hours: default_ttl_hours(),
      max_entries: default_max_entries(),
      quota_bytes: None,
    }
  }
}

fn default_ttl_hours() -> u64 {
  24
}

fn default_max_entries() -> usize {
  DEFAULT_CAPACITY
}

impl CacheConfig {
  pub fn policy(&self) -> CachePolicy {
    CachePolicy {
      ttl_ms: (self.ttl_hours as i64).saturating_mul(60 * 60 * 1000),
      capacity: self.max_entries.max(1),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./metscope.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/metscope/config.yaml
  ///
  /// Without a file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("metscope.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("metscope").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> serde_yaml::Result<Self> {
    let mut config: Config = serde_yaml::from_str(contents)?;
    config.api.base_url = config.api.base_url.trim_end_matches('/').to_string();
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.cache.backend, BackendKind::Sqlite);
    assert_eq!(config.cache.policy(), CachePolicy::default());
  }

  #[test]
  fn test_partial_cache_section() {
    let config = Config::from_yaml(
      "api:\n  base_url: http://localhost:8080/v1/\ncache:\n  backend: memory\n  ttl_hours: 1\n  quota_bytes: 4096\n",
    )
    .unwrap();
    assert_eq!(config.api.base_url, "http://localhost:8080/v1");
    assert_eq!(config.cache.backend, BackendKind::Memory);
    assert_eq!(config.cache.policy().ttl_ms, 60 * 60 * 1000);
    assert_eq!(config.cache.max_entries, DEFAULT_CAPACITY);
    assert_eq!(config.cache.quota_bytes, Some(4096));
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let path = Path::new("/nonexistent/metscope.yaml");
    let err = Config::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
