//! Storage backends: SQLite on disk and an in-memory fallback.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::traits::{StorageBackend, StorageError};
use crate::config::{BackendKind, CacheConfig};

/// Pick the storage backend for this session.
///
/// A SQLite database that cannot be opened is not fatal: the session falls back to
/// memory and the caches simply do not survive a restart.
pub fn open_backend(config: &CacheConfig) -> Arc<dyn StorageBackend> {
  match config.backend {
    BackendKind::Memory => Arc::new(MemoryStorage::new(config.quota_bytes)),
    BackendKind::Sqlite => match SqliteStorage::open(config.path.as_deref(), config.quota_bytes) {
      Ok(storage) => Arc::new(storage),
      Err(e) => {
        tracing::warn!("Persistent cache unavailable, using memory: {}", e);
        Arc::new(MemoryStorage::new(config.quota_bytes))
      }
    },
  }
}

/// In-memory storage, used when persistence is disabled or unavailable.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  blobs: Mutex<HashMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryStorage {
  pub fn new(quota_bytes: Option<usize>) -> Self {
    Self {
      blobs: Mutex::new(HashMap::new()),
      quota_bytes,
    }
  }
}

impl StorageBackend for MemoryStorage {
  fn read(&self, store: &str) -> Result<Option<String>, StorageError> {
    let blobs = self
      .blobs
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))?;
    Ok(blobs.get(store).cloned())
  }

  fn write(&self, store: &str, blob: &str) -> Result<(), StorageError> {
    let mut blobs = self
      .blobs
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))?;

    if let Some(quota) = self.quota_bytes {
      let others: usize = blobs
        .iter()
        .filter(|(name, _)| name.as_str() != store)
        .map(|(_, b)| b.len())
        .sum();
      if others + blob.len() > quota {
        return Err(StorageError::QuotaExceeded {
          store: store.to_string(),
          size: blob.len(),
        });
      }
    }

    blobs.insert(store.to_string(), blob.to_string());
    Ok(())
  }

  fn remove(&self, store: &str) -> Result<(), StorageError> {
    let mut blobs = self
      .blobs
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))?;
    blobs.remove(store);
    Ok(())
  }

  fn name(&self) -> &'static str {
    "memory"
  }
}

/// SQLite-based storage, one row per logical store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  quota_bytes: Option<usize>,
}

/// Schema for the store table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_store (
    name TEXT PRIMARY KEY,
    blob TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStorage {
  /// Open the database at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>, quota_bytes: Option<usize>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
      quota_bytes,
    };
    storage.run_migrations()?;

    tracing::debug!("Opened cache database at {}", path.display());
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("metscope").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))
  }
}

fn sqlite_error(store: &str, size: usize, e: rusqlite::Error) -> StorageError {
  match e {
    rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::DiskFull => {
      StorageError::QuotaExceeded {
        store: store.to_string(),
        size,
      }
    }
    other => StorageError::Backend(other.to_string()),
  }
}

impl StorageBackend for SqliteStorage {
  fn read(&self, store: &str) -> Result<Option<String>, StorageError> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT blob FROM cache_store WHERE name = ?",
        params![store],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| StorageError::Backend(e.to_string()))
  }

  fn write(&self, store: &str, blob: &str) -> Result<(), StorageError> {
    let conn = self.lock()?;

    if let Some(quota) = self.quota_bytes {
      let others: i64 = conn
        .query_row(
          "SELECT COALESCE(SUM(LENGTH(blob)), 0) FROM cache_store WHERE name != ?",
          params![store],
          |row| row.get(0),
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;
      if others.max(0) as usize + blob.len() > quota {
        return Err(StorageError::QuotaExceeded {
          store: store.to_string(),
          size: blob.len(),
        });
      }
    }

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_store (name, blob, written_at)
         VALUES (?, ?, datetime('now'))",
        params![store, blob],
      )
      .map_err(|e| sqlite_error(store, blob.len(), e))?;

    Ok(())
  }

  fn remove(&self, store: &str) -> Result<(), StorageError> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM cache_store WHERE name = ?", params![store])
      .map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(())
  }

  fn name(&self) -> &'static str {
    "sqlite"
  }
}
