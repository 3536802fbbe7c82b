//! SQLite implementation of the content store.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheEntry, CacheStorage, Identity, StoreHandle};
use crate::error::{Error, Result};
use crate::http::{Headers, Response};
use crate::queue::QUEUE_SCHEMA;

/// SQLite-based store.
///
/// One database holds every store generation plus the pending-write queue,
/// so both kinds of offline data share a single durable mechanism.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StoreUnavailable(format!("Failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StoreUnavailable(format!(
        "Failed to open store database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("swcache").join("swcache.db"))
  }

  pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::StoreUnavailable(format!("Lock poisoned: {}", e)))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| Error::StoreUnavailable(format!("Failed to run store migrations: {}", e)))?;
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| Error::StoreUnavailable(format!("Failed to run queue migrations: {}", e)))?;
    Ok(())
  }
}

/// Schema for store generations and their entries.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (store, identity); identity_hash is sha256("METHOD url")
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    identity_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (store_name, identity_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(store_name);
"#;

fn insert_entry(
  conn: &Connection,
  store: &StoreHandle,
  identity: &Identity,
  entry: &CacheEntry,
) -> Result<()> {
  if !identity.is_get() {
    return Err(Error::StoreUnavailable(format!(
      "Refusing to store non-GET request: {}",
      identity
    )));
  }

  let headers = serde_json::to_string(&entry.response.headers)?;
  conn.execute(
    "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
    params![store.name()],
  )?;
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries
       (store_name, identity_hash, method, url, status, headers, body, stored_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    params![
      store.name(),
      identity.cache_hash(),
      identity.method,
      identity.url,
      entry.response.status,
      headers,
      entry.response.body,
      format_datetime(&entry.stored_at),
    ],
  )?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<StoreHandle> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| Error::StoreUnavailable(format!("Failed to open store {}: {}", name, e)))?;
    Ok(StoreHandle::new(name))
  }

  fn find(&self, name: &str) -> Result<Option<StoreHandle>> {
    let conn = self.lock()?;
    let found = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![name],
        |_| Ok(()),
      )
      .optional()?;
    Ok(found.map(|_| StoreHandle::new(name)))
  }

  fn get(&self, store: &StoreHandle, identity: &Identity) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE store_name = ? AND identity_hash = ?",
        params![store.name(), identity.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: Headers = serde_json::from_str(&headers)?;
        Ok(Some(CacheEntry {
          response: Response {
            status,
            headers,
            body,
          },
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &StoreHandle, identity: &Identity, entry: &CacheEntry) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn.unchecked_transaction()?;
    insert_entry(&tx, store, identity, entry)?;
    tx.commit()?;
    Ok(())
  }

  fn put_all(&self, store: &StoreHandle, entries: &[(Identity, CacheEntry)]) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn.unchecked_transaction()?;
    for (identity, entry) in entries {
      insert_entry(&tx, store, identity, entry)?;
    }
    tx.commit()?;
    Ok(())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![name],
    )?;
    let removed = tx.execute("DELETE FROM cache_stores WHERE name = ?", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM cache_stores ORDER BY created_at, name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn entries(&self, store: &StoreHandle) -> Result<Vec<Identity>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT method, url FROM cache_entries WHERE store_name = ? ORDER BY url, method",
    )?;
    let identities = stmt
      .query_map(params![store.name()], |row| {
        Ok(Identity {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<Identity>>>()?;
    Ok(identities)
  }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a stored RFC 3339 timestamp.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::StoreUnavailable(format!("Failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(status: u16, body: &str) -> CacheEntry {
    CacheEntry::new(Response::text(status, body).with_header("X-Served-By", "origin"))
  }

  #[test]
  fn test_put_then_get_round_trips() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let store = storage.open("general-v1").unwrap();
    let id = Identity::new("GET", "https://example.com/css/global.css");
    let stored = entry(200, "body{}");

    storage.put(&store, &id, &stored).unwrap();

    let loaded = storage.get(&store, &id).unwrap().expect("entry present");
    assert_eq!(loaded, stored);
    assert_eq!(loaded.response.headers.get("x-served-by"), Some("origin"));
  }

  #[test]
  fn test_put_overwrites_previous_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let store = storage.open("general-v1").unwrap();
    let id = Identity::new("GET", "https://example.com/");

    storage.put(&store, &id, &entry(200, "old")).unwrap();
    storage.put(&store, &id, &entry(200, "new")).unwrap();

    let loaded = storage.get(&store, &id).unwrap().unwrap();
    assert_eq!(loaded.response.body_text(), "new");
    assert_eq!(storage.entries(&store).unwrap().len(), 1);
  }

  #[test]
  fn test_non_get_is_rejected() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let store = storage.open("general-v1").unwrap();
    let id = Identity::new("POST", "https://example.com/api/cart");

    let err = storage.put(&store, &id, &entry(200, "")).unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(storage.get(&store, &id).unwrap().is_none());
  }

  #[test]
  fn test_put_all_is_all_or_nothing() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let store = storage.open("static-v1").unwrap();
    let batch = vec![
      (Identity::new("GET", "https://example.com/a.css"), entry(200, "a")),
      (Identity::new("POST", "https://example.com/b"), entry(200, "b")),
    ];

    assert!(storage.put_all(&store, &batch).is_err());
    assert!(storage.entries(&store).unwrap().is_empty());
  }

  #[test]
  fn test_stores_are_isolated_and_deletable() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let old = storage.open("general-v0").unwrap();
    let new = storage.open("general-v1").unwrap();
    let id = Identity::new("GET", "https://example.com/");
    storage.put(&old, &id, &entry(200, "old")).unwrap();

    assert!(storage.get(&new, &id).unwrap().is_none());
    assert_eq!(storage.list_names().unwrap().len(), 2);

    assert!(storage.delete("general-v0").unwrap());
    assert!(!storage.delete("general-v0").unwrap());
    assert_eq!(storage.list_names().unwrap(), vec!["general-v1".to_string()]);
    assert!(storage.get(&old, &id).unwrap().is_none());
  }

  #[test]
  fn test_find_does_not_create() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.find("static-v1").unwrap().is_none());
    assert!(storage.list_names().unwrap().is_empty());

    storage.open("static-v1").unwrap();
    let found = storage.find("static-v1").unwrap().expect("store exists");
    assert_eq!(found.name(), "static-v1");
  }

  #[test]
  fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("swcache.db");
    let id = Identity::new("GET", "https://example.com/index.html");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      let store = storage.open("general-v1").unwrap();
      storage.put(&store, &id, &entry(200, "<html>")).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    assert!(storage.exists("general-v1").unwrap());
    let store = storage.open("general-v1").unwrap();
    let loaded = storage.get(&store, &id).unwrap().unwrap();
    assert_eq!(loaded.response.body_text(), "<html>");
  }
}
