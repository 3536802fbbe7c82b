//! Host adapter: the event contract an embedding host delivers to the core.
//!
//! The host owns the event loop. It hands each event to [`ServiceWorker`]
//! (install, activate, fetch, sync, message) and acts on the outcome; the
//! core keeps no global state of its own.

use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::http::Request;
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleManager};
use crate::network::Network;
use crate::queue::PendingWriteQueue;
use crate::strategy::{Served, StrategyExecutor};
use crate::sync::{ReconciliationWorker, SyncReport, SyncTag};

/// Messages posted to the worker by the page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
  SkipWaiting,
  CacheProduct {
    #[serde(rename = "productId", deserialize_with = "string_or_number")]
    product_id: String,
  },
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    other => Err(serde::de::Error::custom(format!(
      "productId must be a string or number, got {}",
      other
    ))),
  }
}

impl HostMessage {
  /// Parse a posted message. Unknown or malformed messages yield `None`.
  pub fn parse(data: &Value) -> Option<Self> {
    match serde_json::from_value(data.clone()) {
      Ok(message) => Some(message),
      Err(e) => {
        debug!(error = %e, "Ignoring unrecognized message");
        None
      }
    }
  }
}

/// Events a host delivers.
#[derive(Debug, Clone)]
pub enum HostEvent {
  Install,
  Activate,
  Fetch(Request),
  /// Connectivity restored, with the registered sync tag
  Sync(String),
  Message(Value),
}

#[derive(Debug, Clone)]
pub enum MessageOutcome {
  SkippedWaiting(Option<ActivateReport>),
  ProductCached { url: Url, stored: bool },
  Ignored,
}

#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed {
    install: InstallReport,
    /// Present when the install skipped waiting and activation ran
    activate: Option<ActivateReport>,
  },
  Activated(ActivateReport),
  /// `None` means pass-through to the default network handling
  Fetched(Option<Served>),
  Synced(Option<SyncReport>),
  Message(MessageOutcome),
}

pub struct ServiceWorker<S, N>
where
  S: CacheStorage + PendingWriteQueue,
  N: Network,
{
  config: Arc<WorkerConfig>,
  executor: StrategyExecutor<S, N>,
  lifecycle: LifecycleManager<S, N>,
  reconciler: ReconciliationWorker<S, N>,
}

impl<S, N> ServiceWorker<S, N>
where
  S: CacheStorage + PendingWriteQueue,
  N: Network,
{
  pub fn new(storage: Arc<S>, network: Arc<N>, config: WorkerConfig) -> Self {
    let config = Arc::new(config);
    Self {
      executor: StrategyExecutor::new(storage.clone(), network.clone(), config.clone()),
      lifecycle: LifecycleManager::new(storage.clone(), network.clone(), config.clone()),
      reconciler: ReconciliationWorker::new(storage, network, config.clone()),
      config,
    }
  }

  pub fn lifecycle(&self) -> &LifecycleManager<S, N> {
    &self.lifecycle
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub async fn dispatch(&self, event: HostEvent) -> Result<EventOutcome> {
    match event {
      HostEvent::Install => {
        let (install, activate) = self.on_install().await?;
        Ok(EventOutcome::Installed { install, activate })
      }
      HostEvent::Activate => self.on_activate().map(EventOutcome::Activated),
      HostEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.on_fetch(&request).await)),
      HostEvent::Sync(tag) => self.on_sync(&tag).await.map(EventOutcome::Synced),
      HostEvent::Message(data) => self.on_message(&data).await.map(EventOutcome::Message),
    }
  }

  /// Install, then activate straight away unless the generation is waiting.
  pub async fn on_install(&self) -> Result<(InstallReport, Option<ActivateReport>)> {
    let install = self.lifecycle.install().await?;
    if self.lifecycle.is_waiting() {
      return Ok((install, None));
    }
    let activate = self.lifecycle.activate()?;
    Ok((install, Some(activate)))
  }

  pub fn on_activate(&self) -> Result<ActivateReport> {
    self.lifecycle.activate()
  }

  pub async fn on_fetch(&self, request: &Request) -> Option<Served> {
    self.executor.handle(request).await
  }

  /// Unknown tags are not ours and yield `None`.
  pub async fn on_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    match tag.parse::<SyncTag>() {
      Ok(tag) => self.reconciler.run(tag).await.map(Some),
      Err(_) => {
        info!(tag, "Ignoring unknown sync tag");
        Ok(None)
      }
    }
  }

  pub async fn on_message(&self, data: &Value) -> Result<MessageOutcome> {
    match HostMessage::parse(data) {
      Some(HostMessage::SkipWaiting) => {
        Ok(MessageOutcome::SkippedWaiting(self.lifecycle.skip_waiting()?))
      }
      Some(HostMessage::CacheProduct { product_id }) => {
        let url = self.config.resolve(&format!("/products/{}.html", product_id))?;
        let stored = match self.executor.precache(url.clone()).await {
          Ok(stored) => {
            if stored {
              info!(%product_id, "Cached product");
            }
            stored
          }
          Err(e) => {
            warn!(%product_id, error = %e, "Failed to cache product");
            false
          }
        };
        Ok(MessageOutcome::ProductCached { url, stored })
      }
      None => Ok(MessageOutcome::Ignored),
    }
  }
}
