//! Caching proxy in front of all outgoing network requests.
//!
//! Every read the application performs goes through [`FetchProxy`], which
//! classifies the request (API read, static asset, or bypass) and applies
//! the matching strategy:
//! - API reads are network-first: fresh responses are captured into the
//!   api partition, and when the network is down the captured copy (or a
//!   synthesized offline payload) is served instead of an error.
//! - Static GETs are cache-first against the shell/runtime partitions.
//! - Non-GET and non-http requests pass straight through.
//!
//! Partitions are versioned by a single tag; `activate` evicts every
//! partition from a previous version.

mod cache;
mod fetcher;
mod layer;
mod types;

pub use cache::{CacheError, MemoryResponseCache, ResponseCache, SqliteResponseCache};
pub use fetcher::{Fetcher, HttpFetcher};
pub use layer::{FetchProxy, ProxyConfig};
pub use types::{
  classify, CachePartition, ClassifyRules, FetchError, FetchRequest, FetchResponse, RequestClass,
  ResponseSource, StoredResponse,
};
