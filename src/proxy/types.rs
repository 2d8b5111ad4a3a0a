//! Request/response types and the pure classification function for the
//! caching fetch proxy.

use reqwest::Method;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

/// An outgoing request as seen by the proxy.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl FetchRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Request identity used as the cache key.
  pub fn identity(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from the network.
  Network,
  /// Replayed from a cache partition.
  Cache,
  /// Synthesized placeholder: network unreachable and nothing cached.
  OfflineFallback,
}

/// A response flowing back through the proxy.
#[derive(Debug, Clone)]
pub struct FetchResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl FetchResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    serde_json::from_slice(&self.body)
  }

  pub(crate) fn from_stored(stored: StoredResponse, source: ResponseSource) -> Self {
    Self {
      status: stored.status,
      headers: stored.headers,
      body: stored.body,
      source,
    }
  }
}

/// The captured representation of a response inside a cache partition.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl From<&FetchResponse> for StoredResponse {
  fn from(response: &FetchResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
    }
  }
}

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network unreachable: {0}")]
  Network(String),
}

/// How the proxy treats a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Story API read: network-first with cache fallback.
  Api,
  /// Any other GET over http(s): cache-first.
  Static,
  /// Non-GET or non-http scheme: passes straight through, never cached.
  Bypass,
}

/// Host/path rules that decide which requests belong to the API class.
#[derive(Debug, Clone)]
pub struct ClassifyRules {
  pub api_host: String,
  /// Path segment that marks API traffic regardless of host.
  pub api_path_marker: String,
}

/// Pure decision function mapping a request onto its caching strategy.
/// Independent of the proxy so the classification table is testable on
/// its own.
pub fn classify(request: &FetchRequest, rules: &ClassifyRules) -> RequestClass {
  if request.method != Method::GET {
    return RequestClass::Bypass;
  }

  let scheme = request.url.scheme();
  if scheme != "http" && scheme != "https" {
    return RequestClass::Bypass;
  }

  if request.url.host_str() == Some(rules.api_host.as_str())
    || request.url.path().contains(&rules.api_path_marker)
  {
    return RequestClass::Api;
  }

  RequestClass::Static
}

/// The three cache partitions. Each name embeds the version tag so that
/// bumping the version orphans every previous partition; `activate`
/// sweeps the orphans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePartition {
  Shell,
  Runtime,
  Api,
}

impl CachePartition {
  pub fn name(&self, version: &str) -> String {
    let slug = match self {
      CachePartition::Shell => "shell",
      CachePartition::Runtime => "runtime",
      CachePartition::Api => "api",
    };
    format!("cerita-{}-{}", slug, version)
  }

  /// The full set of partition names for a version tag.
  pub fn current_names(version: &str) -> [String; 3] {
    [
      CachePartition::Shell.name(version),
      CachePartition::Runtime.name(version),
      CachePartition::Api.name(version),
    ]
  }
}
