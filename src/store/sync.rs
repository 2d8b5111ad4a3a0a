//! Reconciliation of locally-created stories against the remote API.
//!
//! The synchronizer owns no scheduling: callers decide when to run it (on
//! user action, on reconnect, on a timer) and what "submit" means. It only
//! guarantees that a pass over the unsynced set is sequential, that a
//! record's `synced` flag moves false to true and never back, and that a
//! failed submission leaves its record byte-for-byte untouched.

use std::fmt;
use std::future::Future;

use tracing::{info, warn};

use super::{StoreError, StoryRecord, StoryStore};

/// Per-record result of a sync pass.
#[derive(Debug)]
pub struct SyncOutcome {
  pub success: bool,
  /// The confirmed record on success (new id, `synced=true`), the
  /// untouched record on failure.
  pub record: StoryRecord,
  pub error: Option<String>,
}

/// Pushes unsynced records through a caller-supplied submit function.
pub struct Synchronizer<'a> {
  store: &'a StoryStore,
}

impl<'a> Synchronizer<'a> {
  pub fn new(store: &'a StoryStore) -> Self {
    Self { store }
  }

  /// Submit every unsynced record, sequentially, through `submit`.
  ///
  /// `submit` returns the identifier the server assigned to the record.
  /// Returning the record's existing id is valid and skips key rotation.
  /// The unsynced set is snapshotted up front; records created while the
  /// pass runs wait for the next invocation. Re-invoking after a partial
  /// failure re-attempts exactly the records still marked unsynced.
  pub async fn sync_all<F, Fut, E>(&self, submit: F) -> Result<Vec<SyncOutcome>, StoreError>
  where
    F: Fn(&StoryRecord) -> Fut,
    Fut: Future<Output = Result<String, E>>,
    E: fmt::Display,
  {
    let pending = self.store.get_unsynced()?;
    let mut outcomes = Vec::with_capacity(pending.len());

    for record in pending {
      match submit(&record).await {
        Ok(server_id) => {
          let confirmed = if server_id == record.id {
            let mut updated = record.clone();
            updated.synced = true;
            self.store.update(&updated).map(|_| updated)
          } else {
            self.store.reassign_key(&record.id, &server_id)
          };

          match confirmed {
            Ok(updated) => {
              info!(id = %updated.id, "story synced");
              outcomes.push(SyncOutcome {
                success: true,
                record: updated,
                error: None,
              });
            }
            Err(e) => {
              warn!(id = %record.id, error = %e, "failed to confirm synced story");
              let reason = e.to_string();
              outcomes.push(SyncOutcome {
                success: false,
                record,
                error: Some(reason),
              });
            }
          }
        }
        Err(e) => {
          warn!(id = %record.id, error = %e, "story submission failed");
          let reason = e.to_string();
          outcomes.push(SyncOutcome {
            success: false,
            record,
            error: Some(reason),
          });
        }
      }
    }

    Ok(outcomes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{GeoPoint, PhotoRef};
  use chrono::{TimeZone, Utc};
  use std::sync::Mutex;

  fn test_store() -> (tempfile::TempDir, StoryStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StoryStore::open(dir.path().join("stories.db"));
    (dir, store)
  }

  fn unsynced(id: &str, minute: u32) -> StoryRecord {
    StoryRecord {
      id: id.to_string(),
      name: "Ani".to_string(),
      description: format!("cerita {}", id),
      photo: PhotoRef::Blob(vec![1, 2, 3]),
      location: Some(GeoPoint { lat: -6.2, lon: 106.8 }),
      created_at: Utc.with_ymd_and_hms(2024, 1, 1, 8, minute, 0).unwrap(),
      synced: false,
    }
  }

  #[tokio::test]
  async fn test_sync_all_success_drains_unsynced() {
    let (_dir, store) = test_store();
    store.create(&unsynced("temp-a", 0)).unwrap();
    store.create(&unsynced("temp-b", 1)).unwrap();

    let sync = Synchronizer::new(&store);
    let outcomes = sync
      .sync_all(|record| {
        let id = record.id.clone();
        async move { Ok::<_, String>(id.replace("temp", "srv")) }
      })
      .await
      .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.success));
    assert!(store.get_unsynced().unwrap().is_empty());
    assert!(store.get_by_id("srv-a").unwrap().unwrap().synced);
    assert!(store.get_by_id("srv-b").unwrap().unwrap().synced);
  }

  #[tokio::test]
  async fn test_sync_all_partial_failure_leaves_failed_record_untouched() {
    let (_dir, store) = test_store();
    store.create(&unsynced("temp-a", 0)).unwrap();
    store.create(&unsynced("temp-b", 1)).unwrap();
    store.create(&unsynced("temp-c", 2)).unwrap();

    let before = store.get_by_id("temp-b").unwrap().unwrap();

    let sync = Synchronizer::new(&store);
    let outcomes = sync
      .sync_all(|record| {
        let id = record.id.clone();
        async move {
          if id == "temp-b" {
            Err("server rejected photo".to_string())
          } else {
            Ok(id.replace("temp", "srv"))
          }
        }
      })
      .await
      .unwrap();

    let failed: Vec<_> = outcomes.iter().filter(|o| !o.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].record.id, "temp-b");
    assert_eq!(failed[0].error.as_deref(), Some("server rejected photo"));

    // The failed record is byte-for-byte what it was before the pass.
    assert_eq!(store.get_by_id("temp-b").unwrap().unwrap(), before);

    let remaining = store.get_unsynced().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "temp-b");
  }

  #[tokio::test]
  async fn test_sync_all_is_resumable_after_partial_failure() {
    let (_dir, store) = test_store();
    store.create(&unsynced("temp-a", 0)).unwrap();
    store.create(&unsynced("temp-b", 1)).unwrap();

    let sync = Synchronizer::new(&store);
    sync
      .sync_all(|record| {
        let id = record.id.clone();
        async move {
          if id == "temp-b" {
            Err("offline".to_string())
          } else {
            Ok(id.replace("temp", "srv"))
          }
        }
      })
      .await
      .unwrap();

    // Second pass only sees the record that is still unsynced.
    let attempted = Mutex::new(Vec::new());
    let outcomes = sync
      .sync_all(|record| {
        attempted.lock().unwrap().push(record.id.clone());
        let id = record.id.clone();
        async move { Ok::<_, String>(id.replace("temp", "srv")) }
      })
      .await
      .unwrap();

    assert_eq!(*attempted.lock().unwrap(), vec!["temp-b".to_string()]);
    assert_eq!(outcomes.len(), 1);
    assert!(store.get_unsynced().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_sync_all_submits_in_creation_order() {
    let (_dir, store) = test_store();
    store.create(&unsynced("temp-c", 2)).unwrap();
    store.create(&unsynced("temp-a", 0)).unwrap();
    store.create(&unsynced("temp-b", 1)).unwrap();

    let seen = Mutex::new(Vec::new());
    let sync = Synchronizer::new(&store);
    sync
      .sync_all(|record| {
        seen.lock().unwrap().push(record.id.clone());
        let id = record.id.clone();
        async move { Ok::<_, String>(id) }
      })
      .await
      .unwrap();

    assert_eq!(
      *seen.lock().unwrap(),
      vec!["temp-a".to_string(), "temp-b".to_string(), "temp-c".to_string()]
    );
  }

  #[tokio::test]
  async fn test_offline_create_then_sync_scenario() {
    let (_dir, store) = test_store();
    let mut story = unsynced("temp-1", 0);
    story.description = "test".to_string();
    store.create(&story).unwrap();

    let ids: Vec<_> = store.get_unsynced().unwrap().iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec!["temp-1".to_string()]);

    let sync = Synchronizer::new(&store);
    sync
      .sync_all(|_| async { Ok::<_, String>("srv-42".to_string()) })
      .await
      .unwrap();

    let synced = store.get_by_id("srv-42").unwrap().unwrap();
    assert!(synced.synced);
    assert_eq!(synced.description, "test");
    assert!(store.get_by_id("temp-1").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_sync_outcome_on_unchanged_id_marks_synced_in_place() {
    let (_dir, store) = test_store();
    store.create(&unsynced("srv-7", 0)).unwrap();

    let sync = Synchronizer::new(&store);
    let outcomes = sync
      .sync_all(|record| {
        let id = record.id.clone();
        async move { Ok::<_, String>(id) }
      })
      .await
      .unwrap();

    assert!(outcomes[0].success);
    assert!(store.get_by_id("srv-7").unwrap().unwrap().synced);
  }
}
