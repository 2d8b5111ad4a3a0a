//! Durable local store of story records.
//!
//! Stories live in a single SQLite table keyed by record id, with mirrored
//! columns (and indexes) for name, creation time, description and the
//! synced flag. The full record travels as serialized JSON in the `data`
//! column; the mirrored columns exist so lookups and filters hit an index.
//!
//! The underlying connection is created lazily on first use and then
//! shared for the process lifetime; every operation runs in its own
//! implicit transaction.

mod record;
pub mod sync;

pub use record::{
  sort_records, temp_id, GeoPoint, PhotoRef, SortField, SortOrder, StoryRecord, TEMP_ID_PREFIX,
};

use once_cell::sync::OnceCell;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by the local story store.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("story '{0}' already exists")]
  DuplicateKey(String),
  #[error("story '{0}' not found")]
  NotFound(String),
  /// The backing database could not be opened or reached at all.
  #[error("local storage unavailable: {0}")]
  Unavailable(String),
  #[error("storage failure: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("failed to encode story record: {0}")]
  Codec(#[from] serde_json::Error),
}

/// One record that `bulk_upsert` could not apply.
#[derive(Debug)]
pub struct BulkFailure {
  pub id: String,
  pub reason: String,
}

/// Schema for the story table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL,
    synced INTEGER NOT NULL,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stories_name ON stories(name);
CREATE INDEX IF NOT EXISTS idx_stories_created ON stories(created_at);
CREATE INDEX IF NOT EXISTS idx_stories_description ON stories(description);
CREATE INDEX IF NOT EXISTS idx_stories_synced ON stories(synced);
"#;

/// SQLite-backed story store.
pub struct StoryStore {
  path: PathBuf,
  conn: OnceCell<Mutex<Connection>>,
}

impl StoryStore {
  /// Create a store handle for the given database path. The database is
  /// not touched until the first operation.
  pub fn open(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      conn: OnceCell::new(),
    }
  }

  /// Default database location under the platform data directory.
  pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Unavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("cerita").join("stories.db"))
  }

  /// Lazily open the connection and run migrations, once per process.
  fn handle(&self) -> Result<&Mutex<Connection>, StoreError> {
    self.conn.get_or_try_init(|| {
      if let Some(parent) = self.path.parent() {
        std::fs::create_dir_all(parent)
          .map_err(|e| StoreError::Unavailable(format!("failed to create data directory: {}", e)))?;
      }

      let conn = Connection::open(&self.path).map_err(|e| {
        StoreError::Unavailable(format!("failed to open {}: {}", self.path.display(), e))
      })?;

      conn
        .execute_batch(STORE_SCHEMA)
        .map_err(|e| StoreError::Unavailable(format!("failed to run migrations: {}", e)))?;

      Ok(Mutex::new(conn))
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self
      .handle()?
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
  }

  /// Insert a new record. Strict insert: an existing id fails with
  /// `DuplicateKey` rather than being replaced.
  pub fn create(&self, record: &StoryRecord) -> Result<(), StoreError> {
    let conn = self.lock()?;
    let data = serde_json::to_vec(record)?;

    let result = conn.execute(
      "INSERT INTO stories (id, name, description, created_at, synced, data)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        record.id,
        record.name,
        record.description,
        record.created_at.to_rfc3339(),
        record.synced,
        data
      ],
    );

    match result {
      Ok(_) => Ok(()),
      Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateKey(record.id.clone())),
      Err(e) => Err(e.into()),
    }
  }

  /// All records, in unspecified order.
  pub fn get_all(&self) -> Result<Vec<StoryRecord>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT data FROM stories")?;
    let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

    let mut records = Vec::new();
    for row in rows {
      records.push(serde_json::from_slice(&row?)?);
    }
    Ok(records)
  }

  pub fn get_by_id(&self, id: &str) -> Result<Option<StoryRecord>, StoreError> {
    let conn = self.lock()?;
    let data: Option<Vec<u8>> = conn
      .query_row("SELECT data FROM stories WHERE id = ?", params![id], |row| {
        row.get(0)
      })
      .optional()?;

    match data {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  /// Records not yet accepted upstream, oldest first so a sync pass
  /// replays them in creation order.
  pub fn get_unsynced(&self) -> Result<Vec<StoryRecord>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT data FROM stories WHERE synced = 0 ORDER BY created_at ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

    let mut records = Vec::new();
    for row in rows {
      records.push(serde_json::from_slice(&row?)?);
    }
    Ok(records)
  }

  /// Full replace of the record at its key.
  pub fn update(&self, record: &StoryRecord) -> Result<(), StoreError> {
    let conn = self.lock()?;
    let data = serde_json::to_vec(record)?;

    let changed = conn.execute(
      "UPDATE stories SET name = ?, description = ?, created_at = ?, synced = ?, data = ?
       WHERE id = ?",
      params![
        record.name,
        record.description,
        record.created_at.to_rfc3339(),
        record.synced,
        data,
        record.id
      ],
    )?;

    if changed == 0 {
      return Err(StoreError::NotFound(record.id.clone()));
    }
    Ok(())
  }

  /// Remove a record; absent ids are a no-op.
  pub fn delete(&self, id: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM stories WHERE id = ?", params![id])?;
    Ok(())
  }

  /// Insert-or-replace a batch of records, each forced to `synced=true`.
  /// Used when hydrating from the remote API. Records are applied
  /// independently; the returned list names the ones that failed.
  pub fn bulk_upsert(&self, records: &[StoryRecord]) -> Result<Vec<BulkFailure>, StoreError> {
    let conn = self.lock()?;
    let mut failures = Vec::new();

    for record in records {
      let mut hydrated = record.clone();
      hydrated.synced = true;

      let applied = serde_json::to_vec(&hydrated)
        .map_err(StoreError::from)
        .and_then(|data| {
          conn
            .execute(
              "INSERT OR REPLACE INTO stories (id, name, description, created_at, synced, data)
               VALUES (?, ?, ?, ?, ?, ?)",
              params![
                hydrated.id,
                hydrated.name,
                hydrated.description,
                hydrated.created_at.to_rfc3339(),
                hydrated.synced,
                data
              ],
            )
            .map_err(StoreError::from)
        });

      if let Err(e) = applied {
        failures.push(BulkFailure {
          id: hydrated.id.clone(),
          reason: e.to_string(),
        });
      }
    }

    Ok(failures)
  }

  /// Remove every record.
  pub fn clear(&self) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM stories", [])?;
    Ok(())
  }

  /// Atomically rotate a record's key to its server-assigned id and mark
  /// it synced. The single place the key-rotation invariant lives.
  pub fn reassign_key(&self, old_id: &str, new_id: &str) -> Result<StoryRecord, StoreError> {
    let conn = self.lock()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM stories WHERE id = ?",
        params![old_id],
        |row| row.get(0),
      )
      .optional()?;

    let mut record: StoryRecord = match data {
      Some(bytes) => serde_json::from_slice(&bytes)?,
      None => return Err(StoreError::NotFound(old_id.to_string())),
    };
    record.id = new_id.to_string();
    record.synced = true;

    let result = conn.execute(
      "UPDATE stories SET id = ?, synced = 1, data = ? WHERE id = ?",
      params![record.id, serde_json::to_vec(&record)?, old_id],
    );

    match result {
      Ok(_) => Ok(record),
      Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateKey(new_id.to_string())),
      Err(e) => Err(e.into()),
    }
  }

  /// Case-insensitive substring match over name and description, pushed
  /// into SQL where the indexes are.
  pub fn search(&self, query: &str) -> Result<Vec<StoryRecord>, StoreError> {
    let conn = self.lock()?;
    let pattern = format!(
      "%{}%",
      query.to_lowercase().replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );

    let mut stmt = conn.prepare(
      "SELECT data FROM stories
       WHERE lower(name) LIKE ? ESCAPE '\\' OR lower(description) LIKE ? ESCAPE '\\'",
    )?;
    let rows = stmt.query_map(params![pattern, pattern], |row| row.get::<_, Vec<u8>>(0))?;

    let mut records = Vec::new();
    for row in rows {
      records.push(serde_json::from_slice(&row?)?);
    }
    Ok(records)
  }

  /// All records ordered by the given field. Stable: records that compare
  /// equal keep their original order.
  pub fn sorted(&self, field: SortField, order: SortOrder) -> Result<Vec<StoryRecord>, StoreError> {
    let mut records = self.get_all()?;
    sort_records(&mut records, field, order);
    Ok(records)
  }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(failure, _)
      if failure.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};

  fn test_store() -> (tempfile::TempDir, StoryStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StoryStore::open(dir.path().join("stories.db"));
    (dir, store)
  }

  fn record(id: &str, name: &str, description: &str, synced: bool) -> StoryRecord {
    StoryRecord {
      id: id.to_string(),
      name: name.to_string(),
      description: description.to_string(),
      photo: PhotoRef::Url(format!("https://photos.example/{}.jpg", id)),
      location: None,
      created_at: Utc::now(),
      synced,
    }
  }

  #[test]
  fn test_create_then_get_by_id_round_trips() {
    let (_dir, store) = test_store();
    let mut story = record("s1", "Ani", "pemandangan gunung", false);
    story.location = Some(GeoPoint { lat: -6.2, lon: 106.8 });

    store.create(&story).unwrap();
    let loaded = store.get_by_id("s1").unwrap().unwrap();
    assert_eq!(loaded, story);
  }

  #[test]
  fn test_create_duplicate_key_fails() {
    let (_dir, store) = test_store();
    store.create(&record("s1", "Ani", "a", false)).unwrap();

    let err = store.create(&record("s1", "Budi", "b", false)).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(id) if id == "s1"));
  }

  #[test]
  fn test_get_unsynced_returns_exactly_the_unsynced_subset() {
    let (_dir, store) = test_store();
    store.create(&record("a", "Ani", "x", false)).unwrap();
    store.create(&record("b", "Budi", "y", true)).unwrap();
    store.create(&record("c", "Cici", "z", false)).unwrap();
    store.delete("c").unwrap();

    let unsynced = store.get_unsynced().unwrap();
    let ids: Vec<_> = unsynced.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);
  }

  #[test]
  fn test_update_missing_record_is_not_found() {
    let (_dir, store) = test_store();
    let err = store.update(&record("ghost", "Ani", "x", false)).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == "ghost"));
  }

  #[test]
  fn test_delete_absent_is_noop() {
    let (_dir, store) = test_store();
    store.delete("nope").unwrap();
  }

  #[test]
  fn test_bulk_upsert_forces_synced_and_replaces() {
    let (_dir, store) = test_store();
    store.create(&record("s1", "Ani", "old", false)).unwrap();

    let incoming = vec![record("s1", "Ani", "new", false), record("s2", "Budi", "b", false)];
    let failures = store.bulk_upsert(&incoming).unwrap();
    assert!(failures.is_empty());

    let s1 = store.get_by_id("s1").unwrap().unwrap();
    assert_eq!(s1.description, "new");
    assert!(s1.synced);
    assert!(store.get_by_id("s2").unwrap().unwrap().synced);
    assert!(store.get_unsynced().unwrap().is_empty());
  }

  #[test]
  fn test_reassign_key_swaps_id_and_marks_synced() {
    let (_dir, store) = test_store();
    store.create(&record("temp-1", "Ani", "x", false)).unwrap();

    let updated = store.reassign_key("temp-1", "srv-42").unwrap();
    assert_eq!(updated.id, "srv-42");
    assert!(updated.synced);

    assert!(store.get_by_id("temp-1").unwrap().is_none());
    let stored = store.get_by_id("srv-42").unwrap().unwrap();
    assert!(stored.synced);
    assert_eq!(stored.description, "x");
  }

  #[test]
  fn test_reassign_key_to_taken_id_fails_and_leaves_record() {
    let (_dir, store) = test_store();
    store.create(&record("temp-1", "Ani", "x", false)).unwrap();
    store.create(&record("srv-1", "Budi", "y", true)).unwrap();

    let err = store.reassign_key("temp-1", "srv-1").unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(id) if id == "srv-1"));

    let original = store.get_by_id("temp-1").unwrap().unwrap();
    assert!(!original.synced);
  }

  #[test]
  fn test_reassign_key_missing_source_is_not_found() {
    let (_dir, store) = test_store();
    let err = store.reassign_key("ghost", "srv-1").unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
  }

  #[test]
  fn test_search_is_case_insensitive_over_name_and_description() {
    let (_dir, store) = test_store();
    store.create(&record("a", "Ani Lestari", "pantai di Bali", true)).unwrap();
    store.create(&record("b", "Budi", "Gunung BROMO", true)).unwrap();
    store.create(&record("c", "Cici", "kota tua", true)).unwrap();

    let by_name: Vec<_> = store.search("ani").unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].id, "a");

    let by_description: Vec<_> = store.search("bromo").unwrap();
    assert_eq!(by_description.len(), 1);
    assert_eq!(by_description[0].id, "b");

    assert!(store.search("tidak ada").unwrap().is_empty());
  }

  #[test]
  fn test_search_escapes_like_wildcards() {
    let (_dir, store) = test_store();
    store.create(&record("a", "Ani", "100% seru", true)).unwrap();
    store.create(&record("b", "Budi", "biasa saja", true)).unwrap();

    let hits = store.search("100%").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "a");
  }

  #[test]
  fn test_sorted_by_created_at_desc() {
    let (_dir, store) = test_store();
    let mut first = record("a", "Ani", "x", true);
    first.created_at = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    let mut second = record("b", "Budi", "y", true);
    second.created_at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    store.create(&first).unwrap();
    store.create(&second).unwrap();

    let sorted = store.sorted(SortField::CreatedAt, SortOrder::Desc).unwrap();
    let ids: Vec<_> = sorted.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
  }

  #[test]
  fn test_sorted_by_name_is_stable_on_ties() {
    let (_dir, store) = test_store();
    let shared = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    for id in ["a", "b", "c"] {
      let mut story = record(id, "sama", "x", true);
      story.created_at = shared;
      store.create(&story).unwrap();
    }

    // Names (and timestamps) all tie, so both directions keep the
    // original order.
    let asc = store.sorted(SortField::Name, SortOrder::Asc).unwrap();
    let desc = store.sorted(SortField::Name, SortOrder::Desc).unwrap();
    let asc_ids: Vec<_> = asc.iter().map(|r| r.id.as_str()).collect();
    let desc_ids: Vec<_> = desc.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(asc_ids, desc_ids);
  }

  #[test]
  fn test_clear_removes_everything() {
    let (_dir, store) = test_store();
    store.create(&record("a", "Ani", "x", false)).unwrap();
    store.create(&record("b", "Budi", "y", true)).unwrap();

    store.clear().unwrap();
    assert!(store.get_all().unwrap().is_empty());
  }
}
