//! Strategy executor: routes each classified request through its
//! cache/network race and updates the store opportunistically.
//!
//! | Class  | Strategy                          | Writes through |
//! |--------|-----------------------------------|----------------|
//! | Static | cache first, network fallback     | on 200         |
//! | Other  | network first, cache fallback     | on 200         |
//! | Html   | network first, offline page       | on 200         |
//! | Api    | network first, cached/JSON error  | never          |
//!
//! No strategy fails: the worst case is a synthetic 503.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, Identity};
use crate::classify::{classify, RequestClass};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::network::Network;

const STATIC_UNAVAILABLE: &str = "Offline content not available";
const CONTENT_UNAVAILABLE: &str = "Content not available offline";
const API_OFFLINE_ERROR: &str = "Network unavailable";
const API_OFFLINE_MESSAGE: &str = "Please check your internet connection and try again.";

/// Last-resort page when neither the request nor the offline page is stored.
pub const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Offline</title>
</head>
<body>
  <main class="offline-container">
    <h1>You're Offline</h1>
    <p>No internet connection detected. Some cached content may still be available,
    but full functionality requires an internet connection.</p>
    <button onclick="window.location.reload()">Try Again</button>
  </main>
</body>
</html>
"#;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// From the store
  Cache,
  /// Synthesized locally because network and store both came up empty
  Synthetic,
}

/// A response handed back at the interception boundary.
#[derive(Debug, Clone)]
pub struct Served {
  pub class: RequestClass,
  pub source: ResponseSource,
  pub response: Response,
}

impl Served {
  fn new(class: RequestClass, source: ResponseSource, response: Response) -> Self {
    Self {
      class,
      source,
      response,
    }
  }
}

/// Executes the per-class strategies against a store and a network.
pub struct StrategyExecutor<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  config: Arc<WorkerConfig>,
}

impl<S: CacheStorage, N: Network> StrategyExecutor<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, config: Arc<WorkerConfig>) -> Self {
    Self {
      storage,
      network,
      config,
    }
  }

  /// Intercept a request. `None` means the request is not ours to handle and
  /// should go to the network untouched.
  pub async fn handle(&self, request: &Request) -> Option<Served> {
    let class = classify(request, &self.config.static_extensions)?;
    debug!(url = %request.url, ?class, "Intercepted request");

    let served = match class {
      RequestClass::Static => self.cache_first(request).await,
      RequestClass::Other => self.network_first(request).await,
      RequestClass::Html => self.network_first_html(request).await,
      RequestClass::Api => self.network_first_api(request).await,
    };
    Some(served)
  }

  /// Static: store hit returns without touching the network.
  async fn cache_first(&self, request: &Request) -> Served {
    let class = RequestClass::Static;
    let identity = request.identity();

    if let Ok(entry) = self.lookup(&identity) {
      debug!(%identity, "Cache hit");
      return Served::new(class, ResponseSource::Cache, entry.response);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(&identity, &response);
        Served::new(class, ResponseSource::Network, response)
      }
      Err(e) => {
        warn!(%identity, error = %e, "Cache-first strategy failed");
        Served::new(
          class,
          ResponseSource::Synthetic,
          Response::text(503, STATIC_UNAVAILABLE),
        )
      }
    }
  }

  /// Other: the network wins whenever it answers at all.
  async fn network_first(&self, request: &Request) -> Served {
    let class = RequestClass::Other;
    let identity = request.identity();

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(&identity, &response);
        Served::new(class, ResponseSource::Network, response)
      }
      Err(e) => {
        debug!(%identity, error = %e, "Network failed, trying cache");
        match self.lookup(&identity) {
          Ok(entry) => Served::new(class, ResponseSource::Cache, entry.response),
          Err(_) => Served::new(
            class,
            ResponseSource::Synthetic,
            Response::text(503, CONTENT_UNAVAILABLE),
          ),
        }
      }
    }
  }

  /// Html: falls back to the stored page, then the stored offline page, then
  /// the inline offline document.
  async fn network_first_html(&self, request: &Request) -> Served {
    let class = RequestClass::Html;
    let identity = request.identity();

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(&identity, &response);
        Served::new(class, ResponseSource::Network, response)
      }
      Err(e) => {
        debug!(%identity, error = %e, "Network failed for page, trying cache");
        let offline_page = Identity::new("GET", self.config.offline_page.as_str());
        match self
          .lookup(&identity)
          .or_else(|_| self.lookup(&offline_page))
        {
          Ok(entry) => Served::new(class, ResponseSource::Cache, entry.response),
          Err(_) => Served::new(
            class,
            ResponseSource::Synthetic,
            Response::html(503, OFFLINE_HTML),
          ),
        }
      }
    }
  }

  /// Api: responses pass through verbatim and are never written to the store.
  async fn network_first_api(&self, request: &Request) -> Served {
    let class = RequestClass::Api;
    let identity = request.identity();

    match self.network.fetch(request).await {
      Ok(response) => Served::new(class, ResponseSource::Network, response),
      Err(e) => {
        debug!(%identity, error = %e, "API call failed");
        match self.lookup(&identity) {
          Ok(entry) => Served::new(class, ResponseSource::Cache, entry.response),
          Err(_) => Served::new(
            class,
            ResponseSource::Synthetic,
            Response::json(
              503,
              &json!({
                "error": API_OFFLINE_ERROR,
                "message": API_OFFLINE_MESSAGE,
                "offline": true,
              }),
            ),
          ),
        }
      }
    }
  }

  /// Fetch one URL and store it in the general cache. Returns whether the
  /// response was stored (only status 200 is).
  pub async fn precache(&self, url: Url) -> Result<bool> {
    let request = Request::get(url);
    let response = self.network.fetch(&request).await?;
    if !response.is_cacheable() {
      debug!(url = %request.url, status = response.status, "Not precaching non-200 response");
      return Ok(false);
    }

    let store = self.storage.open(&self.config.cache_name)?;
    self
      .storage
      .put(&store, &request.identity(), &CacheEntry::new(response))?;
    Ok(true)
  }

  /// Find an entry in the current generation, static cache first.
  /// Store read failures count as a miss. Never creates a store.
  fn lookup(&self, identity: &Identity) -> Result<CacheEntry> {
    for name in self.config.current_cache_names() {
      let found = self.storage.find(name).and_then(|store| match store {
        Some(store) => self.storage.get(&store, identity),
        None => Ok(None),
      });
      match found {
        Ok(Some(entry)) => return Ok(entry),
        Ok(None) => {}
        Err(e) => warn!(store = name, %identity, error = %e, "Store read failed"),
      }
    }
    Err(Error::NotFound(identity.clone()))
  }

  /// Write a snapshot of a 200 response to the general cache. Failures are
  /// logged and swallowed.
  ///
  /// The write completes synchronously once the response is in hand, so a
  /// cancelled interception cannot leave it half done.
  fn store(&self, identity: &Identity, response: &Response) {
    if !response.is_cacheable() {
      return;
    }
    let entry = CacheEntry::new(response.clone());
    let result = self
      .storage
      .open(&self.config.cache_name)
      .and_then(|store| self.storage.put(&store, identity, &entry));
    if let Err(e) = result {
      warn!(%identity, error = %e, "Failed to store response");
    }
  }
}

impl<S: CacheStorage, N: Network> Clone for StrategyExecutor<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      config: Arc::clone(&self.config),
    }
  }
}
