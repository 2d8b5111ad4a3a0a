//! Response cache storage: trait plus SQLite and in-memory backends.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

use super::types::StoredResponse;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("response cache unavailable: {0}")]
  Unavailable(String),
  #[error("response cache failure: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("failed to encode cached response: {0}")]
  Codec(#[from] serde_json::Error),
}

/// Keyed storage for captured responses, organized into named partitions.
pub trait ResponseCache: Send + Sync {
  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>, CacheError>;

  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<(), CacheError>;

  /// Names of every partition currently holding entries.
  fn partitions(&self) -> Result<Vec<String>, CacheError>;

  /// Drop a whole partition and everything in it.
  fn remove_partition(&self, partition: &str) -> Result<(), CacheError>;
}

/// Schema for the response cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_partition ON response_cache(partition);
"#;

/// Durable SQLite-backed response cache.
pub struct SqliteResponseCache {
  conn: Mutex<Connection>,
}

impl SqliteResponseCache {
  pub fn open(path: &Path) -> Result<Self, CacheError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Unavailable(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| CacheError::Unavailable(format!("failed to open {}: {}", path.display(), e)))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::Unavailable(format!("failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

impl ResponseCache for SqliteResponseCache {
  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>, CacheError> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM response_cache
         WHERE partition = ? AND request_key = ?",
        params![partition, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body)) => Ok(Some(StoredResponse {
        status,
        headers: serde_json::from_str(&headers)?,
        body,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<(), CacheError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO response_cache (partition, request_key, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        key,
        response.status,
        serde_json::to_string(&response.headers)?,
        response.body
      ],
    )?;
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>, CacheError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT DISTINCT partition FROM response_cache")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut names = Vec::new();
    for row in rows {
      names.push(row?);
    }
    Ok(names)
  }

  fn remove_partition(&self, partition: &str) -> Result<(), CacheError> {
    let conn = self.lock()?;
    conn.execute(
      "DELETE FROM response_cache WHERE partition = ?",
      params![partition],
    )?;
    Ok(())
  }
}

/// In-memory response cache for tests and cache-disabled runs.
#[derive(Default)]
pub struct MemoryResponseCache {
  entries: Mutex<HashMap<(String, String), StoredResponse>>,
}

impl MemoryResponseCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), StoredResponse>>, CacheError> {
    self
      .entries
      .lock()
      .map_err(|e| CacheError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

impl ResponseCache for MemoryResponseCache {
  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>, CacheError> {
    let entries = self.lock()?;
    Ok(entries.get(&(partition.to_string(), key.to_string())).cloned())
  }

  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<(), CacheError> {
    let mut entries = self.lock()?;
    entries.insert((partition.to_string(), key.to_string()), response.clone());
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>, CacheError> {
    let entries = self.lock()?;
    let mut names: Vec<String> = entries.keys().map(|(partition, _)| partition.clone()).collect();
    names.sort();
    names.dedup();
    Ok(names)
  }

  fn remove_partition(&self, partition: &str) -> Result<(), CacheError> {
    let mut entries = self.lock()?;
    entries.retain(|(name, _), _| name != partition);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stored(body: &[u8]) -> StoredResponse {
    StoredResponse {
      status: 200,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: body.to_vec(),
    }
  }

  #[test]
  fn test_sqlite_cache_put_get_and_partition_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let cache = SqliteResponseCache::open(&dir.path().join("cache.db")).unwrap();

    cache.put("cerita-api-v1", "GET https://a/1", &stored(b"one")).unwrap();
    cache.put("cerita-api-v0", "GET https://a/1", &stored(b"old")).unwrap();

    let hit = cache.get("cerita-api-v1", "GET https://a/1").unwrap().unwrap();
    assert_eq!(hit.body, b"one");
    assert_eq!(hit.headers[0].0, "content-type");
    assert!(cache.get("cerita-api-v1", "GET https://a/2").unwrap().is_none());

    cache.remove_partition("cerita-api-v0").unwrap();
    assert_eq!(cache.partitions().unwrap(), vec!["cerita-api-v1".to_string()]);
  }

  #[test]
  fn test_memory_cache_tracks_partitions() {
    let cache = MemoryResponseCache::new();
    cache.put("a", "k1", &stored(b"x")).unwrap();
    cache.put("a", "k2", &stored(b"y")).unwrap();
    cache.put("b", "k1", &stored(b"z")).unwrap();

    assert_eq!(cache.partitions().unwrap(), vec!["a".to_string(), "b".to_string()]);

    cache.remove_partition("a").unwrap();
    assert!(cache.get("a", "k1").unwrap().is_none());
    assert_eq!(cache.partitions().unwrap(), vec!["b".to_string()]);
  }
}
