//! Composition root: owns the store, cache proxy and API client, and maps
//! CLI subcommands onto them.
//!
//! Every service object is constructed exactly once here and handed to
//! the operations that need it; nothing reaches for hidden globals.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use url::Url;

use crate::api::{ApiError, NewStory, StoryClient, SubscriptionKeys};
use crate::config::{Config, Session};
use crate::proxy::{
  ClassifyRules, FetchProxy, HttpFetcher, ProxyConfig, ResponseSource, SqliteResponseCache,
};
use crate::push::{
  build_notification, dispatch_click, parse_push_payload, NavigateMessage, PushPayload,
  SurfaceRegistry,
};
use crate::store::sync::Synchronizer;
use crate::store::{
  sort_records, GeoPoint, PhotoRef, SortField, SortOrder, StoryRecord, StoryStore,
};

/// How long a user-visible operation may run before the CLI abandons it.
/// The underlying future is dropped, not cancelled remotely.
const UI_TIMEOUT: Duration = Duration::from_secs(10);

/// Author name used when no session is stored.
const ANONYMOUS: &str = "Anonim";

pub struct App {
  config: Config,
  store: StoryStore,
  proxy: FetchProxy<SqliteResponseCache>,
  client: StoryClient<SqliteResponseCache>,
  session: Option<Session>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let store_path = match &config.storage.path {
      Some(path) => path.clone(),
      None => StoryStore::default_path()?,
    };
    let store = StoryStore::open(store_path);

    let cache_path = match &config.cache.path {
      Some(path) => path.clone(),
      None => default_cache_path()?,
    };
    let cache = Arc::new(SqliteResponseCache::open(&cache_path)?);

    let base = Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid api base_url {}: {}", config.api.base_url, e))?;
    let rules = ClassifyRules {
      api_host: base.host_str().unwrap_or_default().to_string(),
      api_path_marker: format!("{}/", base.path().trim_end_matches('/')),
    };

    let fetcher = Arc::new(HttpFetcher::new(UI_TIMEOUT)?);
    let proxy = FetchProxy::new(
      fetcher,
      cache,
      ProxyConfig {
        rules,
        version: config.cache.version.clone(),
      },
    );

    // New version tag in the config? This is where the old partitions go.
    let removed = proxy.activate()?;
    if !removed.is_empty() {
      info!(partitions = ?removed, "evicted stale cache partitions");
    }

    let session = Session::load();
    let client = StoryClient::new(&config.api.base_url, proxy.clone(), Session::token())?;

    Ok(Self {
      config,
      store,
      proxy,
      client,
      session,
    })
  }

  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
    let message = with_timeout(self.client.register(name, email, password)).await?;
    println!("Account created: {}", message);
    Ok(())
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<()> {
    let result = with_timeout(self.client.login(email, password)).await?;
    let session = Session {
      token: result.token,
      name: result.name,
    };
    session.save()?;
    println!("Signed in as {}", session.name);
    Ok(())
  }

  /// Submit a story. The record is persisted locally whatever the network
  /// does: synced when the API accepted it, unsynced (with the raw photo
  /// bytes retained) when it did not.
  pub async fn add(
    &self,
    description: &str,
    photo_path: &Path,
    lat: Option<f64>,
    lon: Option<f64>,
    offline: bool,
  ) -> Result<()> {
    let location = match (lat, lon) {
      (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
      (None, None) => None,
      _ => return Err(eyre!("--lat and --lon must be given together")),
    };

    let photo = std::fs::read(photo_path)
      .map_err(|e| eyre!("Failed to read photo {}: {}", photo_path.display(), e))?;
    let mime = mime_guess::from_path(photo_path)
      .first_or_octet_stream()
      .essence_str()
      .to_string();
    let author = self
      .session
      .as_ref()
      .map(|s| s.name.clone())
      .unwrap_or_else(|| ANONYMOUS.to_string());

    if offline {
      return self.save_unsynced(author, description, photo, location);
    }

    let filename = photo_path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "photo.jpg".to_string());
    let submission = NewStory {
      description: description.to_string(),
      photo: photo.clone(),
      filename,
      mime: mime.clone(),
      location,
    };

    match with_timeout(self.client.add_story(&submission)).await {
      Ok(server_id) => {
        let mut record = StoryRecord::new_local(
          author,
          description,
          PhotoRef::Inline(format!("data:{};base64,{}", mime, STANDARD.encode(&photo))),
          location,
        );
        if let Some(id) = server_id {
          record.id = id;
        }
        record.synced = true;
        self.store.create(&record)?;
        println!("Story submitted (id {})", record.id);
        Ok(())
      }
      Err(err) => {
        warn!(error = %err, "submission failed, keeping story for later sync");
        self.save_unsynced(author, description, photo, location)
      }
    }
  }

  fn save_unsynced(
    &self,
    author: String,
    description: &str,
    photo: Vec<u8>,
    location: Option<GeoPoint>,
  ) -> Result<()> {
    let record = StoryRecord::new_local(author, description, PhotoRef::Blob(photo), location);
    self.store.create(&record)?;
    println!(
      "API unreachable; story saved locally as {} (run `cerita sync` later)",
      record.id
    );
    Ok(())
  }

  /// List stories from the API, hydrating the local store with the result.
  pub async fn list(&self, page: u32, size: u32) -> Result<()> {
    let (stories, source) = with_timeout(self.client.get_stories(page, size, true)).await?;

    let records: Vec<StoryRecord> = stories.into_iter().map(|s| s.into_record()).collect();
    let failures = self.store.bulk_upsert(&records)?;
    for failure in &failures {
      warn!(id = %failure.id, reason = %failure.reason, "failed to hydrate story");
    }

    for record in &records {
      print_story(record);
    }
    println!("{} stories", records.len());
    if source != ResponseSource::Network {
      println!("(network unreachable; showing cached data)");
    }
    Ok(())
  }

  /// Browse the local store.
  pub fn saved(
    &self,
    search: Option<&str>,
    field: SortField,
    order: SortOrder,
    unsynced_only: bool,
  ) -> Result<()> {
    let mut records = match search {
      Some(query) => {
        let mut hits = self.store.search(query)?;
        sort_records(&mut hits, field, order);
        hits
      }
      None => self.store.sorted(field, order)?,
    };

    if unsynced_only {
      records.retain(|r| !r.synced);
    }

    let unsynced = records.iter().filter(|r| !r.synced).count();
    for record in &records {
      print_story(record);
    }
    println!("Total: {} stories | unsynced: {}", records.len(), unsynced);
    Ok(())
  }

  /// Show one story, falling back to the local store when the API (and
  /// its cache) cannot produce it.
  pub async fn detail(&self, id: &str) -> Result<()> {
    match with_timeout(self.client.get_story(id)).await {
      Ok((story, source)) => {
        print_story(&story.into_record());
        if source != ResponseSource::Network {
          println!("(network unreachable; showing cached data)");
        }
        Ok(())
      }
      Err(err) => match self.store.get_by_id(id)? {
        Some(record) => {
          print_story(&record);
          println!("(from local store)");
          Ok(())
        }
        None => Err(err),
      },
    }
  }

  /// Push every unsynced local story to the API.
  pub async fn sync(&self) -> Result<()> {
    let synchronizer = Synchronizer::new(&self.store);
    let outcomes = synchronizer
      .sync_all(|record| {
        let client = &self.client;
        let id = record.id.clone();
        let description = record.description.clone();
        let photo = record.photo.clone();
        let location = record.location;

        async move {
          let bytes = match photo {
            PhotoRef::Blob(bytes) => bytes,
            PhotoRef::Inline(data_url) => decode_data_url(&data_url)?,
            PhotoRef::Url(_) => return Err("no retained photo payload to upload".to_string()),
          };

          let submission = NewStory {
            description,
            photo: bytes,
            filename: format!("story-{}.jpg", id),
            mime: "image/jpeg".to_string(),
            location,
          };

          match client.add_story(&submission).await {
            Ok(Some(server_id)) => Ok(server_id),
            // Server did not echo the created story; keep the local id.
            Ok(None) => Ok(id),
            Err(err) => Err(err.to_string()),
          }
        }
      })
      .await?;

    if outcomes.is_empty() {
      println!("Nothing to sync");
      return Ok(());
    }

    let mut synced = 0;
    for outcome in &outcomes {
      if outcome.success {
        synced += 1;
        println!("synced {}", outcome.record.id);
      } else {
        println!(
          "failed {}: {}",
          outcome.record.id,
          outcome.error.as_deref().unwrap_or("unknown error")
        );
      }
    }
    println!("{} of {} stories synced", synced, outcomes.len());
    Ok(())
  }

  pub fn remove(&self, id: &str) -> Result<()> {
    self.store.delete(id)?;
    println!("Removed {}", id);
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    self.store.clear()?;
    println!("Local store cleared");
    Ok(())
  }

  /// Prefetch the configured shell assets into the cache.
  pub async fn prefetch(&self) -> Result<()> {
    let manifest = &self.config.cache.prefetch;
    if manifest.is_empty() {
      println!("No shell assets configured under cache.prefetch");
      return Ok(());
    }

    let cached = self.proxy.install(manifest).await;
    println!("{} of {} assets cached", cached, manifest.len());
    Ok(())
  }

  /// Decode a push payload and show the notification it would produce.
  pub fn notify(&self, payload_path: Option<&Path>) -> Result<()> {
    let bytes = match payload_path {
      Some(path) => std::fs::read(path)
        .map_err(|e| eyre!("Failed to read payload {}: {}", path.display(), e))?,
      None => {
        use std::io::Read as _;
        let mut buffer = Vec::new();
        std::io::stdin().read_to_end(&mut buffer)?;
        buffer
      }
    };

    let payload = parse_push_payload(Some(&bytes)).unwrap_or_else(|err| {
      warn!(error = %err, "malformed push payload, using defaults");
      PushPayload::default()
    });

    let notification = build_notification(&payload);
    println!("title: {}", notification.title);
    println!("body:  {}", notification.body);
    println!("tag:   {}", notification.tag);
    for action in &notification.actions {
      println!("action: {} ({})", action.title, action.action);
    }
    dispatch_click(&CliSurfaces, &notification.data);
    Ok(())
  }

  pub async fn subscribe(&self, endpoint: &str, p256dh: &str, auth: &str) -> Result<()> {
    let keys = SubscriptionKeys {
      p256dh: p256dh.to_string(),
      auth: auth.to_string(),
    };
    let message = with_timeout(self.client.subscribe_push(endpoint, &keys)).await?;
    println!("Subscribed: {}", message);
    Ok(())
  }

  pub async fn unsubscribe(&self, endpoint: &str) -> Result<()> {
    let message = with_timeout(self.client.unsubscribe_push(endpoint)).await?;
    println!("Unsubscribed: {}", message);
    Ok(())
  }
}

/// The CLI never has another application context open, so every tap
/// resolves to opening the deep link.
struct CliSurfaces;

impl SurfaceRegistry for CliSurfaces {
  fn has_open_context(&self) -> bool {
    false
  }

  fn focus_and_deliver(&self, message: &NavigateMessage) {
    println!("navigates: {}", message.url);
  }

  fn open(&self, url: &str) {
    println!("opens: {}", url);
  }
}

fn default_cache_path() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("cerita").join("cache.db"))
}

fn print_story(record: &StoryRecord) {
  let badge = if record.synced { "synced" } else { "local" };
  let location = match &record.location {
    Some(point) => format!(" @ {:.4},{:.4}", point.lat, point.lon),
    None => String::new(),
  };
  println!(
    "[{}] {} - {} ({}{})",
    badge, record.id, record.description, record.name, location
  );
}

/// Decode the payload of a `data:<mime>;base64,<payload>` URL.
fn decode_data_url(data_url: &str) -> Result<Vec<u8>, String> {
  let payload = data_url
    .split_once(',')
    .map(|(_, payload)| payload)
    .ok_or_else(|| "malformed data url".to_string())?;
  STANDARD
    .decode(payload)
    .map_err(|e| format!("malformed data url payload: {}", e))
}

async fn with_timeout<T>(
  future: impl std::future::Future<Output = Result<T, ApiError>>,
) -> Result<T> {
  match tokio::time::timeout(UI_TIMEOUT, future).await {
    Ok(result) => Ok(result?),
    Err(_) => Err(eyre!(
      "request abandoned after {}s; the story API did not respond",
      UI_TIMEOUT.as_secs()
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_data_url() {
    let bytes = decode_data_url("data:image/jpeg;base64,3q2+7w==").unwrap();
    assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);

    assert!(decode_data_url("no comma here").is_err());
  }
}
