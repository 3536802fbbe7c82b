//! Error taxonomy shared by the store, strategies, lifecycle and sync worker.

use thiserror::Error;

use crate::cache::Identity;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("Network unavailable: {0}")]
  NetworkUnavailable(String),

  #[error("Not found in store: {0}")]
  NotFound(Identity),

  #[error("Install asset missing: {url} ({reason})")]
  InstallAssetMissing { url: String, reason: String },

  #[error("Invalid lifecycle transition: cannot {event} while {from}")]
  InvalidTransition { from: String, event: &'static str },

  #[error("Invalid configuration: {0}")]
  Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Error::StoreUnavailable(e.to_string())
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::StoreUnavailable(format!("Failed to (de)serialize stored data: {}", e))
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Error::NetworkUnavailable(e.to_string())
  }
}
