//! Fetch proxy that applies a per-request-class caching strategy.
//!
//! Sits as middleware in front of a [`Fetcher`]: API reads are
//! network-first (cache fallback, then a synthesized offline payload),
//! other GETs are cache-first, everything else passes straight through.
//! Cache writes are best-effort; a failed write never blocks the response
//! that was already fetched.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use super::cache::ResponseCache;
use super::fetcher::Fetcher;
use super::types::{
  classify, CachePartition, ClassifyRules, FetchError, FetchRequest, FetchResponse, RequestClass,
  ResponseSource, StoredResponse,
};

/// Body served for API reads when the network is down and nothing is
/// cached. Keeps the API's own error envelope shape so callers handle it
/// through the same path as a server-side failure.
const OFFLINE_FALLBACK_BODY: &[u8] = br#"{"error":true,"message":"Offline - data dari cache"}"#;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
  pub rules: ClassifyRules,
  /// Version tag embedded in partition names. Bumping it is the only
  /// supported cache migration: `activate` sweeps every partition that
  /// does not carry the current tag.
  pub version: String,
}

/// Caching middleware in front of the network pipeline.
pub struct FetchProxy<C: ResponseCache> {
  fetcher: Arc<dyn Fetcher>,
  cache: Arc<C>,
  config: ProxyConfig,
}

impl<C: ResponseCache> FetchProxy<C> {
  pub fn new(fetcher: Arc<dyn Fetcher>, cache: Arc<C>, config: ProxyConfig) -> Self {
    Self {
      fetcher,
      cache,
      config,
    }
  }

  /// Route one request through its class strategy.
  pub async fn handle(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
    match classify(request, &self.config.rules) {
      RequestClass::Bypass => self.fetcher.fetch(request).await,
      RequestClass::Api => Ok(self.network_first(request).await),
      RequestClass::Static => self.cache_first(request).await,
    }
  }

  /// Network-first strategy for API reads. Never fails: a dead network
  /// degrades to the cached copy, then to the offline payload.
  async fn network_first(&self, request: &FetchRequest) -> FetchResponse {
    let partition = CachePartition::Api.name(&self.config.version);

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store_response(&partition, request, &response);
        }
        response
      }
      Err(err) => {
        debug!(key = %request.identity(), error = %err, "network failed, trying api cache");
        match self.cache.get(&partition, &request.identity()) {
          Ok(Some(stored)) => FetchResponse::from_stored(stored, ResponseSource::Cache),
          Ok(None) => offline_fallback(),
          Err(cache_err) => {
            warn!(key = %request.identity(), error = %cache_err, "api cache read failed");
            offline_fallback()
          }
        }
      }
    }
  }

  /// Cache-first strategy for static assets. Shell entries win over
  /// opportunistically captured runtime entries.
  async fn cache_first(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
    let shell = CachePartition::Shell.name(&self.config.version);
    let runtime = CachePartition::Runtime.name(&self.config.version);
    let key = request.identity();

    for partition in [&shell, &runtime] {
      match self.cache.get(partition, &key) {
        Ok(Some(stored)) => return Ok(FetchResponse::from_stored(stored, ResponseSource::Cache)),
        Ok(None) => {}
        Err(err) => warn!(key = %key, error = %err, "cache read failed"),
      }
    }

    let response = self.fetcher.fetch(request).await?;
    if response.is_success() {
      self.store_response(&runtime, request, &response);
    }
    Ok(response)
  }

  fn store_response(&self, partition: &str, request: &FetchRequest, response: &FetchResponse) {
    let stored = StoredResponse::from(response);
    if let Err(err) = self.cache.put(partition, &request.identity(), &stored) {
      warn!(key = %request.identity(), error = %err, "failed to cache response");
    }
  }

  /// Populate the shell partition from a manifest of application-shell
  /// assets. Individual failures are logged and skipped; one missing
  /// asset never aborts the install. Returns how many assets were cached.
  pub async fn install(&self, manifest: &[String]) -> usize {
    let partition = CachePartition::Shell.name(&self.config.version);
    let mut cached = 0;

    for asset in manifest {
      let url = match Url::parse(asset) {
        Ok(url) => url,
        Err(err) => {
          warn!(asset = %asset, error = %err, "skipping unparseable shell asset");
          continue;
        }
      };

      let request = FetchRequest::get(url);
      match self.fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          self.store_response(&partition, &request, &response);
          cached += 1;
        }
        Ok(response) => {
          warn!(asset = %asset, status = response.status, "shell asset fetch not ok");
        }
        Err(err) => {
          warn!(asset = %asset, error = %err, "shell asset fetch failed");
        }
      }
    }

    cached
  }

  /// Sweep every partition whose name does not match the current version
  /// tag. Returns the names that were removed.
  pub fn activate(&self) -> Result<Vec<String>, super::cache::CacheError> {
    let current = CachePartition::current_names(&self.config.version);
    let mut removed = Vec::new();

    for name in self.cache.partitions()? {
      if !current.contains(&name) {
        self.cache.remove_partition(&name)?;
        removed.push(name);
      }
    }

    Ok(removed)
  }
}

impl<C: ResponseCache> Clone for FetchProxy<C> {
  fn clone(&self) -> Self {
    Self {
      fetcher: Arc::clone(&self.fetcher),
      cache: Arc::clone(&self.cache),
      config: self.config.clone(),
    }
  }
}

fn offline_fallback() -> FetchResponse {
  FetchResponse {
    status: 200,
    headers: vec![("content-type".to_string(), "application/json".to_string())],
    body: OFFLINE_FALLBACK_BODY.to_vec(),
    source: ResponseSource::OfflineFallback,
  }
}
