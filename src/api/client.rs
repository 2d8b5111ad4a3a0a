//! Typed client for the Story API.
//!
//! Read endpoints go through the caching fetch proxy, so list/detail keep
//! working from the api partition when the network is down; the response
//! source tag tells the caller when it is looking at replayed data.
//! Writes (register, login, story submission, push subscription) talk to
//! the network directly; the proxy would pass them through untouched
//! anyway, since non-GET requests bypass classification.

use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::proxy::{
  FetchError, FetchProxy, FetchRequest, FetchResponse, ResponseCache, ResponseSource,
};
use crate::store::GeoPoint;

use super::types::{
  AddStoryResponse, ApiEnvelope, ApiStory, LoginResponse, LoginResult, StoriesResponse,
  StoryResponse, SubscriptionKeys,
};

/// Timeout applied to every direct request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),
  #[error(transparent)]
  Fetch(#[from] FetchError),
  /// Non-2xx status, or a response body flagging an error.
  #[error("api error (status {status}): {message}")]
  Api { status: u16, message: String },
  #[error("malformed api response: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("invalid api url: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("not signed in; run `cerita login` first")]
  MissingToken,
}

/// A story ready for submission.
#[derive(Debug, Clone)]
pub struct NewStory {
  pub description: String,
  pub photo: Vec<u8>,
  pub filename: String,
  pub mime: String,
  pub location: Option<GeoPoint>,
}

/// Story API client.
pub struct StoryClient<C: ResponseCache> {
  http: reqwest::Client,
  proxy: FetchProxy<C>,
  /// Base URL without a trailing slash, e.g.
  /// `https://story-api.dicoding.dev/v1`.
  base: String,
  token: Option<String>,
}

impl<C: ResponseCache> StoryClient<C> {
  pub fn new(
    base_url: &str,
    proxy: FetchProxy<C>,
    token: Option<String>,
  ) -> Result<Self, ApiError> {
    let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

    Ok(Self {
      http,
      proxy,
      base: base_url.trim_end_matches('/').to_string(),
      token,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    Ok(Url::parse(&format!("{}{}", self.base, path))?)
  }

  fn token(&self) -> Result<&str, ApiError> {
    self.token.as_deref().ok_or(ApiError::MissingToken)
  }

  fn authorized_get(&self, url: Url) -> Result<FetchRequest, ApiError> {
    let token = self.token()?;
    Ok(FetchRequest::get(url).header("Authorization", format!("Bearer {}", token)))
  }

  /// Create a new account. Returns the server's success message.
  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String, ApiError> {
    let url = self.endpoint("/register")?;
    let response = self
      .http
      .post(url)
      .json(&json!({ "name": name, "email": email, "password": password }))
      .send()
      .await?;

    let envelope: ApiEnvelope = decode(response).await?;
    Ok(envelope.message)
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult, ApiError> {
    let url = self.endpoint("/login")?;
    let response = self
      .http
      .post(url)
      .json(&json!({ "email": email, "password": password }))
      .send()
      .await?;

    let parsed: LoginResponse = decode(response).await?;
    Ok(parsed.login_result)
  }

  /// List stories. The second element reports whether the data came from
  /// the network or was replayed from cache while offline.
  pub async fn get_stories(
    &self,
    page: u32,
    size: u32,
    with_location: bool,
  ) -> Result<(Vec<ApiStory>, ResponseSource), ApiError> {
    let location = if with_location { 1 } else { 0 };
    let url = self.endpoint(&format!(
      "/stories?page={}&size={}&location={}",
      page, size, location
    ))?;

    let request = self.authorized_get(url)?;
    let response = self.proxy.handle(&request).await?;
    let parsed: StoriesResponse = parse_proxied(&response)?;
    Ok((parsed.list_story, response.source))
  }

  pub async fn get_story(&self, id: &str) -> Result<(ApiStory, ResponseSource), ApiError> {
    let url = self.endpoint(&format!("/stories/{}", id))?;
    let request = self.authorized_get(url)?;
    let response = self.proxy.handle(&request).await?;
    let parsed: StoryResponse = parse_proxied(&response)?;
    Ok((parsed.story, response.source))
  }

  /// Submit a story. Returns the server-assigned id when the server
  /// echoes the created story back, `None` otherwise.
  pub async fn add_story(&self, story: &NewStory) -> Result<Option<String>, ApiError> {
    let url = self.endpoint("/stories")?;

    let mut form = multipart::Form::new().text("description", story.description.clone());
    if let Some(location) = &story.location {
      form = form
        .text("lat", location.lat.to_string())
        .text("lon", location.lon.to_string());
    }
    let photo = multipart::Part::bytes(story.photo.clone())
      .file_name(story.filename.clone())
      .mime_str(&story.mime)?;
    form = form.part("photo", photo);

    let response = self
      .http
      .post(url)
      .bearer_auth(self.token()?)
      .multipart(form)
      .send()
      .await?;

    let parsed: AddStoryResponse = decode(response).await?;
    Ok(parsed.story.map(|s| s.id))
  }

  pub async fn subscribe_push(
    &self,
    endpoint: &str,
    keys: &SubscriptionKeys,
  ) -> Result<String, ApiError> {
    let url = self.endpoint("/notifications/subscribe")?;
    let response = self
      .http
      .post(url)
      .bearer_auth(self.token()?)
      .json(&json!({ "endpoint": endpoint, "keys": keys }))
      .send()
      .await?;

    let envelope: ApiEnvelope = decode(response).await?;
    Ok(envelope.message)
  }

  pub async fn unsubscribe_push(&self, endpoint: &str) -> Result<String, ApiError> {
    let url = self.endpoint("/notifications/subscribe")?;
    let response = self
      .http
      .delete(url)
      .bearer_auth(self.token()?)
      .json(&json!({ "endpoint": endpoint }))
      .send()
      .await?;

    let envelope: ApiEnvelope = decode(response).await?;
    Ok(envelope.message)
  }
}

/// Decode a direct (non-proxied) response, applying the error convention:
/// non-2xx, or a JSON body with the error flag set, is a typed failure.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
  let status = response.status().as_u16();
  let bytes = response.bytes().await?;

  let envelope: ApiEnvelope = serde_json::from_slice(&bytes).unwrap_or_default();
  if !(200..300).contains(&status) || envelope.error {
    return Err(ApiError::Api {
      status,
      message: failure_message(envelope, status),
    });
  }

  Ok(serde_json::from_slice(&bytes)?)
}

/// Decode a proxied response. The proxy's offline fallback reuses the API
/// error envelope, so degraded responses surface here as typed failures
/// carrying the offline message.
fn parse_proxied<T: DeserializeOwned>(response: &FetchResponse) -> Result<T, ApiError> {
  let envelope: ApiEnvelope = response.json().unwrap_or_default();
  if !response.is_success() || envelope.error {
    return Err(ApiError::Api {
      status: response.status,
      message: failure_message(envelope, response.status),
    });
  }

  Ok(response.json()?)
}

fn failure_message(envelope: ApiEnvelope, status: u16) -> String {
  if envelope.message.is_empty() {
    format!("request failed with status {}", status)
  } else {
    envelope.message
  }
}
