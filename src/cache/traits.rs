//! Core traits and types for the content store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::http::Response;

/// Store lookup key: the (method, absolute URL) pair of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
  pub method: String,
  pub url: String,
}

impl Identity {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  /// Stable, fixed-length key for storage.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(response: Response) -> Self {
    Self {
      response,
      stored_at: Utc::now(),
    }
  }
}

/// Handle to an opened store generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHandle {
  name: String,
}

impl StoreHandle {
  pub(crate) fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

/// Trait for content store backends.
///
/// Implementations must give at least read-your-own-preceding-write
/// consistency, and every `put` must be all-or-nothing.
pub trait CacheStorage: Send + Sync {
  /// Open a named store, creating it if absent.
  fn open(&self, name: &str) -> Result<StoreHandle>;

  /// Handle to an existing store. Never creates one.
  fn find(&self, name: &str) -> Result<Option<StoreHandle>> {
    Ok(self.exists(name)?.then(|| StoreHandle::new(name)))
  }

  /// Look up an entry by identity.
  fn get(&self, store: &StoreHandle, identity: &Identity) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any previous one for the same identity.
  fn put(&self, store: &StoreHandle, identity: &Identity, entry: &CacheEntry) -> Result<()>;

  /// Store a batch of entries in one transaction. Either all land or none do.
  fn put_all(&self, store: &StoreHandle, entries: &[(Identity, CacheEntry)]) -> Result<()>;

  /// Delete a named store and everything in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Names of all existing stores.
  fn list_names(&self) -> Result<Vec<String>>;

  /// Identities held by a store.
  fn entries(&self, store: &StoreHandle) -> Result<Vec<Identity>>;

  fn exists(&self, name: &str) -> Result<bool> {
    Ok(self.list_names()?.iter().any(|n| n == name))
  }
}
