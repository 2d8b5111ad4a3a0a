//! Story record types shared by the local store, synchronizer and API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix used for identifiers assigned locally, before the server has
/// accepted the record.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// A geotag attached to a story. Latitude and longitude always travel
/// together; a story without a location simply carries `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
  pub lat: f64,
  pub lon: f64,
}

/// Reference to a story's photo.
///
/// A record hydrated from the API points at the remote photo; a record
/// submitted online keeps an inline data URL for instant display; a record
/// created while offline retains the raw bytes so the photo can still be
/// uploaded when the record syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PhotoRef {
  /// Remote photo location as returned by the story API.
  Url(String),
  /// Inline-encoded image (data URL) captured at submission time.
  Inline(String),
  /// Raw image bytes retained for a later upload attempt.
  Blob(#[serde(with = "base64_bytes")] Vec<u8>),
}

/// A unit of user-generated content as persisted by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
  /// Unique within the store. Server-assigned once confirmed, otherwise a
  /// locally-generated temporary identifier.
  pub id: String,
  /// Author display name.
  pub name: String,
  pub description: String,
  pub photo: PhotoRef,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<GeoPoint>,
  pub created_at: DateTime<Utc>,
  /// False until the server has accepted this record.
  pub synced: bool,
}

impl StoryRecord {
  /// Build a locally-authored record: fresh collision-resistant temporary
  /// id, `created_at` now, `synced` false.
  pub fn new_local(
    name: impl Into<String>,
    description: impl Into<String>,
    photo: PhotoRef,
    location: Option<GeoPoint>,
  ) -> Self {
    Self {
      id: temp_id(),
      name: name.into(),
      description: description.into(),
      photo,
      location,
      created_at: Utc::now(),
      synced: false,
    }
  }
}

/// Generate a temporary identifier for a record created before the server
/// has assigned one. UUID-based so rapid successive offline creations
/// cannot collide.
pub fn temp_id() -> String {
  format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4())
}

/// Fields the store can order records by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
  CreatedAt,
  Name,
  Description,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
  Asc,
  Desc,
}

/// Stable in-place sort over records. Textual fields compare
/// case-insensitively, `created_at` as a timestamp; records that compare
/// equal keep their original order in both directions.
pub fn sort_records(records: &mut [StoryRecord], field: SortField, order: SortOrder) {
  let compare = |a: &StoryRecord, b: &StoryRecord| match field {
    SortField::CreatedAt => a.created_at.cmp(&b.created_at),
    SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    SortField::Description => a.description.to_lowercase().cmp(&b.description.to_lowercase()),
  };

  records.sort_by(|a, b| match order {
    SortOrder::Asc => compare(a, b),
    SortOrder::Desc => compare(b, a),
  });
}

mod base64_bytes {
  use base64::engine::general_purpose::STANDARD;
  use base64::Engine as _;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_temp_ids_are_unique() {
    let a = temp_id();
    let b = temp_id();
    assert!(a.starts_with(TEMP_ID_PREFIX));
    assert_ne!(a, b);
  }

  #[test]
  fn test_new_local_defaults() {
    let record = StoryRecord::new_local("Ani", "halo", PhotoRef::Blob(vec![1, 2, 3]), None);
    assert!(record.id.starts_with(TEMP_ID_PREFIX));
    assert!(!record.synced);
  }

  #[test]
  fn test_photo_blob_serializes_as_base64() {
    let photo = PhotoRef::Blob(vec![0xde, 0xad, 0xbe, 0xef]);
    let json = serde_json::to_value(&photo).unwrap();
    assert_eq!(json["kind"], "blob");
    assert_eq!(json["value"], "3q2+7w==");
  }
}
