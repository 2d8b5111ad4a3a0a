//! Wire types for the Story API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{GeoPoint, PhotoRef, StoryRecord};

/// Envelope every API response carries. A body with `error: true` is a
/// failure even under a 2xx status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEnvelope {
  #[serde(default)]
  pub error: bool,
  #[serde(default)]
  pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
  pub login_result: LoginResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResult {
  pub token: String,
  pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoriesResponse {
  #[serde(default)]
  pub list_story: Vec<ApiStory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoryResponse {
  pub story: ApiStory,
}

/// Response to a story submission. The server may or may not echo the
/// created story back; when it does not, the caller keeps its local id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddStoryResponse {
  #[serde(default)]
  pub story: Option<CreatedStory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedStory {
  pub id: String,
}

/// A story as the API serves it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStory {
  pub id: String,
  pub name: String,
  pub description: String,
  #[serde(default)]
  pub photo_url: Option<String>,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub lat: Option<f64>,
  #[serde(default)]
  pub lon: Option<f64>,
}

impl ApiStory {
  /// Convert into a local record. Hydrated records are by definition
  /// already accepted upstream, so they arrive `synced=true`.
  pub fn into_record(self) -> StoryRecord {
    let location = match (self.lat, self.lon) {
      (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
      _ => None,
    };

    StoryRecord {
      id: self.id,
      name: self.name,
      description: self.description,
      photo: PhotoRef::Url(self.photo_url.unwrap_or_default()),
      location,
      created_at: self.created_at,
      synced: true,
    }
  }
}

/// Keys of a push subscription as the push service hands them out.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionKeys {
  pub p256dh: String,
  pub auth: String,
}
