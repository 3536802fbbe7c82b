use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Error, Result};
use crate::queue::Category;

/// Environment variable that overrides the configured origin.
const ORIGIN_ENV: &str = "SWCACHE_ORIGIN";

const DEFAULT_STATIC_EXTENSIONS: &[&str] = &[
  ".css", ".js", ".png", ".jpg", ".jpeg", ".svg", ".ico", ".woff", ".woff2", ".ttf",
];

const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/products.html",
  "/curriculum.html",
  "/institutional.html",
  "/resources.html",
  "/cart.html",
  "/checkout.html",
  "/css/global.css",
  "/css/fontawesome.css",
  "/manifest.json",
  "https://cdn.tailwindcss.com",
  "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700;800&display=swap",
  "/offline.html",
];

/// Configuration file contents.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the intercepted front-end is served from
  pub origin: String,
  /// Store database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// General cache name for the current generation
  pub name: String,
  /// Static-asset cache name for the current generation
  pub static_name: String,
  /// Paths fetched and stored at install
  pub manifest: Vec<String>,
  #[serde(deserialize_with = "deserialize_extensions")]
  pub static_extensions: Vec<String>,
  pub offline_page: String,
  /// Leave the waiting state as soon as install succeeds
  pub skip_waiting_on_install: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "science-capital-sa-v1.0.0".to_string(),
      static_name: "science-capital-static-v1.0.0".to_string(),
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      static_extensions: DEFAULT_STATIC_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect(),
      offline_page: "/offline.html".to_string(),
      skip_waiting_on_install: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub cart_endpoint: String,
  pub quotes_endpoint: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      cart_endpoint: "/api/cart/sync".to_string(),
      quotes_endpoint: "/api/quotes/submit".to_string(),
    }
  }
}

/// Lowercase extensions and make sure each carries its leading dot.
fn deserialize_extensions<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| {
        let s = s.trim().to_lowercase();
        if s.starts_with('.') {
          s
        } else {
          format!(".{}", s)
        }
      })
      .collect(),
  )
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// `SWCACHE_ORIGIN` overrides the origin from the file.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => match std::env::var(ORIGIN_ENV) {
        Ok(origin) => Self::for_origin(&origin),
        Err(_) => {
          return Err(Error::Config(format!(
            "No configuration file found. Create one at ~/.config/swcache/config.yaml \
             or set {}.",
            ORIGIN_ENV
          )))
        }
      },
    };

    if let Ok(origin) = std::env::var(ORIGIN_ENV) {
      config.origin = origin;
    }

    Ok(config)
  }

  /// Configuration with every default and the given origin.
  pub fn for_origin(origin: &str) -> Self {
    Self {
      origin: origin.to_string(),
      database: None,
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_yaml(&contents).map_err(|e| match e {
      Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
      other => other,
    })
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents)
      .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
  }

  /// Validate and resolve into the explicit configuration the core runs on.
  pub fn worker_config(&self) -> Result<WorkerConfig> {
    let origin = Url::parse(&self.origin)
      .map_err(|e| Error::Config(format!("Invalid origin '{}': {}", self.origin, e)))?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(Error::Config(format!(
        "Origin must be http or https: {}",
        self.origin
      )));
    }
    if self.cache.name == self.cache.static_name {
      return Err(Error::Config(
        "cache.name and cache.static_name must differ".to_string(),
      ));
    }

    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| Error::Config(format!("Invalid path '{}': {}", path, e)))
    };

    Ok(WorkerConfig {
      offline_page: resolve(&self.cache.offline_page)?,
      cart_endpoint: resolve(&self.sync.cart_endpoint)?,
      quotes_endpoint: resolve(&self.sync.quotes_endpoint)?,
      origin: origin.clone(),
      cache_name: self.cache.name.clone(),
      static_cache_name: self.cache.static_name.clone(),
      manifest: self.cache.manifest.clone(),
      static_extensions: self.cache.static_extensions.clone(),
      skip_waiting_on_install: self.cache.skip_waiting_on_install,
    })
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(p) => Ok(p.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }
}

/// Resolved configuration handed to the executor, lifecycle manager and
/// sync worker at construction.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub origin: Url,
  pub cache_name: String,
  pub static_cache_name: String,
  pub manifest: Vec<String>,
  pub static_extensions: Vec<String>,
  pub offline_page: Url,
  pub skip_waiting_on_install: bool,
  pub cart_endpoint: Url,
  pub quotes_endpoint: Url,
}

impl WorkerConfig {
  /// Names of the current generation's stores, in lookup order.
  pub fn current_cache_names(&self) -> [&str; 2] {
    [self.static_cache_name.as_str(), self.cache_name.as_str()]
  }

  pub fn is_current(&self, name: &str) -> bool {
    self.current_cache_names().contains(&name)
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }

  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| Error::Config(format!("Invalid path '{}': {}", path, e)))
  }

  pub fn endpoint(&self, category: Category) -> &Url {
    match category {
      Category::Cart => &self.cart_endpoint,
      Category::Quotes => &self.quotes_endpoint,
    }
  }
}
