//! Lifecycle manager: install, activate and skip-wait for one store
//! generation.
//!
//! ```text
//! Uninitialized -> Installing -> Installed { waiting } -> Activating -> Active
//!       ^               |
//!       +---- failed ---+
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::http::Request;
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninitialized,
  Installing,
  /// Installed; `waiting` until skip-wait or the host decides to activate
  Installed { waiting: bool },
  Activating,
  Active,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LifecycleState::Uninitialized => f.write_str("uninitialized"),
      LifecycleState::Installing => f.write_str("installing"),
      LifecycleState::Installed { waiting: true } => f.write_str("installed (waiting)"),
      LifecycleState::Installed { waiting: false } => f.write_str("installed"),
      LifecycleState::Activating => f.write_str("activating"),
      LifecycleState::Active => f.write_str("active"),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  /// Manifest URLs fetched and stored
  pub cached: Vec<Url>,
  /// Manifest entries left to opportunistic caching (cross-origin)
  pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  /// Stores purged because they belong to another generation
  pub deleted: Vec<String>,
}

pub struct LifecycleManager<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  config: Arc<WorkerConfig>,
  state: Mutex<LifecycleState>,
  clients_claimed: AtomicBool,
  /// Set by skip-wait in any state; read when an install completes
  skip_waiting_requested: AtomicBool,
}

impl<S: CacheStorage, N: Network> LifecycleManager<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, config: Arc<WorkerConfig>) -> Self {
    Self {
      storage,
      network,
      config,
      state: Mutex::new(LifecycleState::Uninitialized),
      clients_claimed: AtomicBool::new(false),
      skip_waiting_requested: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> LifecycleState {
    *self.lock_state()
  }

  pub fn is_waiting(&self) -> bool {
    matches!(self.state(), LifecycleState::Installed { waiting: true })
  }

  /// Whether open clients have been taken over by the active generation.
  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }

  fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: LifecycleState) {
    debug!(%state, "Lifecycle transition");
    *self.lock_state() = state;
  }

  /// Populate the static cache from the manifest.
  ///
  /// Every same-origin manifest asset must fetch with a 2xx status before
  /// anything is written; one failure aborts the install and stores nothing.
  pub async fn install(&self) -> Result<InstallReport> {
    {
      let mut state = self.lock_state();
      match *state {
        LifecycleState::Uninitialized | LifecycleState::Installed { .. } => {
          *state = LifecycleState::Installing;
        }
        from => {
          return Err(Error::InvalidTransition {
            from: from.to_string(),
            event: "install",
          })
        }
      }
    }
    info!(store = %self.config.static_cache_name, "Installing");

    match self.populate().await {
      Ok(report) => {
        let waiting = !(self.config.skip_waiting_on_install
          || self.skip_waiting_requested.load(Ordering::SeqCst));
        self.set_state(LifecycleState::Installed { waiting });
        info!(
          cached = report.cached.len(),
          skipped = report.skipped.len(),
          waiting,
          "Static assets cached"
        );
        Ok(report)
      }
      Err(e) => {
        warn!(error = %e, "Install failed");
        self.set_state(LifecycleState::Uninitialized);
        Err(e)
      }
    }
  }

  async fn populate(&self) -> Result<InstallReport> {
    let mut report = InstallReport::default();
    let mut urls = Vec::new();
    for entry in &self.config.manifest {
      let url = self.config.resolve(entry).map_err(|e| Error::InstallAssetMissing {
        url: entry.clone(),
        reason: e.to_string(),
      })?;
      if self.config.is_same_origin(&url) {
        urls.push(url);
      } else {
        debug!(%url, "Skipping cross-origin manifest entry");
        report.skipped.push(entry.clone());
      }
    }

    let fetches = urls.iter().map(|url| async move {
      let request = Request::get(url.clone());
      match self.network.fetch(&request).await {
        Ok(response) if response.is_success() => {
          Ok((request.identity(), CacheEntry::new(response)))
        }
        Ok(response) => Err(Error::InstallAssetMissing {
          url: url.to_string(),
          reason: format!("status {}", response.status),
        }),
        Err(e) => Err(Error::InstallAssetMissing {
          url: url.to_string(),
          reason: e.to_string(),
        }),
      }
    });
    let entries = join_all(fetches)
      .await
      .into_iter()
      .collect::<Result<Vec<_>>>()?;

    let store = self.storage.open(&self.config.static_cache_name)?;
    self.storage.put_all(&store, &entries)?;

    report.cached = urls;
    Ok(report)
  }

  /// Purge every store outside the current generation and claim clients.
  ///
  /// Running it again with the same generation deletes nothing.
  pub fn activate(&self) -> Result<ActivateReport> {
    let previous = {
      let mut state = self.lock_state();
      let previous = *state;
      let allowed = match previous {
        LifecycleState::Installed { .. } | LifecycleState::Active => true,
        LifecycleState::Uninitialized => self.installed_earlier()?,
        LifecycleState::Installing | LifecycleState::Activating => false,
      };
      if !allowed {
        return Err(Error::InvalidTransition {
          from: previous.to_string(),
          event: "activate",
        });
      }
      *state = LifecycleState::Activating;
      previous
    };
    info!("Activating");

    match self.purge_old_generations() {
      Ok(report) => {
        self.set_state(LifecycleState::Active);
        self.clients_claimed.store(true, Ordering::SeqCst);
        info!(deleted = report.deleted.len(), "Activated");
        Ok(report)
      }
      Err(e) => {
        warn!(error = %e, "Activation failed");
        self.set_state(previous);
        Err(e)
      }
    }
  }

  /// A populated static store can only come from a completed install by an
  /// earlier process: install writes it in one transaction, and lookups never
  /// create stores.
  fn installed_earlier(&self) -> Result<bool> {
    match self.storage.find(&self.config.static_cache_name)? {
      Some(store) => Ok(!self.storage.entries(&store)?.is_empty()),
      None => Ok(false),
    }
  }

  fn purge_old_generations(&self) -> Result<ActivateReport> {
    let mut report = ActivateReport::default();
    for name in self.storage.list_names()? {
      if self.config.is_current(&name) {
        continue;
      }
      info!(store = %name, "Deleting old cache");
      if self.storage.delete(&name)? {
        report.deleted.push(name);
      }
    }
    Ok(report)
  }

  /// Leave the waiting state. An installed generation activates right away;
  /// otherwise the request is kept and the next completed install does not
  /// wait.
  pub fn skip_waiting(&self) -> Result<Option<ActivateReport>> {
    self.skip_waiting_requested.store(true, Ordering::SeqCst);
    let installed = {
      let mut state = self.lock_state();
      match &mut *state {
        LifecycleState::Installed { waiting } => {
          *waiting = false;
          true
        }
        _ => false,
      }
    };

    if installed {
      self.activate().map(Some)
    } else {
      debug!(state = %self.state(), "Skip-wait recorded for the next install");
      Ok(None)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Identity, SqliteStorage};
  use crate::config::Config;
  use crate::http::Response;
  use crate::test_support::{storage, url, worker_config, FakeNetwork, ORIGIN};
  use tokio::sync::Notify;

  type Manager = LifecycleManager<SqliteStorage, FakeNetwork>;

  fn small_config(skip_waiting: bool) -> Arc<WorkerConfig> {
    let mut config = Config::for_origin(ORIGIN);
    config.cache.manifest = vec![
      "/".to_string(),
      "/css/global.css".to_string(),
      "https://cdn.tailwindcss.com".to_string(),
      "/offline.html".to_string(),
    ];
    config.cache.skip_waiting_on_install = skip_waiting;
    Arc::new(config.worker_config().unwrap())
  }

  fn route_manifest(network: &FakeNetwork) {
    network.route(&url("/"), Response::html(200, "<p>home</p>"));
    network.route(&url("/css/global.css"), Response::text(200, "body{}"));
    network.route(&url("/offline.html"), Response::html(200, "<p>offline</p>"));
  }

  fn setup(config: Arc<WorkerConfig>) -> (Manager, Arc<SqliteStorage>, Arc<FakeNetwork>) {
    let storage = storage();
    let network = FakeNetwork::new();
    let manager = LifecycleManager::new(storage.clone(), network.clone(), config);
    (manager, storage, network)
  }

  #[tokio::test]
  async fn test_install_caches_same_origin_manifest() {
    let (manager, storage, network) = setup(small_config(false));
    route_manifest(&network);

    let report = manager.install().await.unwrap();

    assert_eq!(report.cached.len(), 3);
    assert_eq!(report.skipped, vec!["https://cdn.tailwindcss.com".to_string()]);
    assert!(!network
      .calls()
      .iter()
      .any(|c| c.contains("cdn.tailwindcss.com")));
    assert_eq!(manager.state(), LifecycleState::Installed { waiting: true });

    let store = storage.open("science-capital-static-v1.0.0").unwrap();
    let entry = storage
      .get(&store, &Identity::new("GET", &url("/css/global.css")))
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.body_text(), "body{}");
  }

  #[tokio::test]
  async fn test_install_aborts_on_missing_asset() {
    let (manager, storage, network) = setup(small_config(true));
    route_manifest(&network);
    network.fail(&url("/offline.html"));

    let err = manager.install().await.unwrap_err();

    assert!(matches!(err, Error::InstallAssetMissing { .. }));
    assert_eq!(manager.state(), LifecycleState::Uninitialized);
    assert!(storage.list_names().unwrap().is_empty());
    assert!(manager.activate().is_err());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let (manager, storage, network) = setup(small_config(true));
    route_manifest(&network);
    network.route(&url("/"), Response::html(500, "boom"));

    assert!(manager.install().await.is_err());
    let store = storage.open("science-capital-static-v1.0.0").unwrap();
    assert!(storage.entries(&store).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_with_skip_waiting_is_not_waiting() {
    let (manager, _storage, network) = setup(small_config(true));
    route_manifest(&network);

    manager.install().await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Installed { waiting: false });
    assert!(!manager.is_waiting());
  }

  #[tokio::test]
  async fn test_activate_purges_other_generations_and_is_idempotent() {
    let (manager, storage, network) = setup(small_config(true));
    route_manifest(&network);
    storage.open("science-capital-sa-v0.9.0").unwrap();
    storage.open("science-capital-static-v0.9.0").unwrap();
    storage.open("science-capital-sa-v1.0.0").unwrap();

    manager.install().await.unwrap();
    let first = manager.activate().unwrap();

    assert_eq!(first.deleted.len(), 2);
    assert_eq!(manager.state(), LifecycleState::Active);
    assert!(manager.clients_claimed());
    let mut names = storage.list_names().unwrap();
    names.sort();
    assert_eq!(
      names,
      vec![
        "science-capital-sa-v1.0.0".to_string(),
        "science-capital-static-v1.0.0".to_string()
      ]
    );

    let second = manager.activate().unwrap();
    assert!(second.deleted.is_empty());
    assert_eq!(storage.list_names().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_activate_before_install_is_rejected() {
    let (manager, _storage, _network) = setup(worker_config());
    let err = manager.activate().unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
  }

  #[tokio::test]
  async fn test_activate_resumes_earlier_install() {
    let (manager, storage, _network) = setup(worker_config());
    let store = storage.open("science-capital-static-v1.0.0").unwrap();
    storage
      .put(
        &store,
        &Identity::new("GET", &url("/offline.html")),
        &CacheEntry::new(Response::html(200, "<p>offline</p>")),
      )
      .unwrap();
    storage.open("old-cache").unwrap();

    let report = manager.activate().unwrap();
    assert_eq!(report.deleted, vec!["old-cache".to_string()]);
  }

  #[tokio::test]
  async fn test_empty_static_store_is_not_an_earlier_install() {
    let (manager, storage, _network) = setup(worker_config());
    storage.open("science-capital-static-v1.0.0").unwrap();
    storage.open("science-capital-sa-v0.9.0").unwrap();

    let err = manager.activate().unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(manager.state(), LifecycleState::Uninitialized);
    assert!(storage.exists("science-capital-sa-v0.9.0").unwrap());
  }

  #[tokio::test]
  async fn test_skip_waiting_before_install_is_remembered() {
    let (manager, _storage, network) = setup(small_config(false));
    route_manifest(&network);

    assert!(manager.skip_waiting().unwrap().is_none());

    manager.install().await.unwrap();
    assert!(!manager.is_waiting());
    assert_eq!(manager.state(), LifecycleState::Installed { waiting: false });
  }

  #[tokio::test]
  async fn test_skip_waiting_after_install_activates() {
    let (manager, _storage, network) = setup(small_config(false));
    route_manifest(&network);

    manager.install().await.unwrap();
    assert!(manager.is_waiting());
    assert!(manager.skip_waiting().unwrap().is_some());
    assert_eq!(manager.state(), LifecycleState::Active);
  }

  /// Holds every fetch until released, announcing each one as it starts.
  struct GatedNetwork {
    inner: Arc<FakeNetwork>,
    entered: Notify,
    release: Notify,
  }

  #[async_trait::async_trait]
  impl Network for GatedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      let released = self.release.notified();
      self.entered.notify_one();
      released.await;
      self.inner.fetch(request).await
    }
  }

  #[tokio::test]
  async fn test_skip_waiting_during_install_is_not_lost() {
    let fake = FakeNetwork::new();
    route_manifest(&fake);
    let network = Arc::new(GatedNetwork {
      inner: fake,
      entered: Notify::new(),
      release: Notify::new(),
    });
    let manager = LifecycleManager::new(storage(), network.clone(), small_config(false));

    let (installed, (state_at_signal, skipped)) = tokio::join!(manager.install(), async {
      network.entered.notified().await;
      let state = manager.state();
      let skipped = manager.skip_waiting().unwrap();
      network.release.notify_waiters();
      (state, skipped)
    });

    installed.unwrap();
    assert_eq!(state_at_signal, LifecycleState::Installing);
    assert!(skipped.is_none());
    assert_eq!(manager.state(), LifecycleState::Installed { waiting: false });
  }
}
