//! Shared fixtures for unit tests: a scripted network and a default config.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cache::SqliteStorage;
use crate::config::{Config, WorkerConfig};
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::network::Network;

pub const ORIGIN: &str = "https://shop.example";

/// Network double: answers from a route table, records every call, and can
/// be switched offline wholesale or per URL.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Answer `url` with `response`. Unrouted URLs answer 404.
  pub fn route(&self, url: &str, response: Response) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  /// Reject requests to `url` as if the connection failed.
  pub fn fail(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Calls made so far, as "METHOD url".
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method, url));

    if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&url) {
      return Err(Error::NetworkUnavailable(format!("offline: {}", url)));
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&url)
        .cloned()
        .unwrap_or_else(|| Response::text(404, "not found")),
    )
  }
}

pub fn worker_config() -> Arc<WorkerConfig> {
  Arc::new(Config::for_origin(ORIGIN).worker_config().unwrap())
}

pub fn storage() -> Arc<SqliteStorage> {
  Arc::new(SqliteStorage::open_in_memory().unwrap())
}

pub fn url(path: &str) -> String {
  format!("{}{}", ORIGIN, path)
}
