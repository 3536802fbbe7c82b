//! Pending-write queue: per-category records of writes made while offline,
//! waiting to be replayed by the sync worker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{parse_datetime, SqliteStorage};
use crate::error::{Error, Result};

/// Schema for the pending-write queue. `seq` preserves append order.
pub(crate) const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_writes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    record_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    UNIQUE (category, record_id)
);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Cart,
  Quotes,
}

impl Category {
  pub const ALL: [Category; 2] = [Category::Cart, Category::Quotes];

  pub fn as_str(&self) -> &'static str {
    match self {
      Category::Cart => "cart",
      Category::Quotes => "quotes",
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Category {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "cart" => Ok(Category::Cart),
      "quotes" | "quote" => Ok(Category::Quotes),
      other => Err(Error::Config(format!("Unknown pending-write category: {}", other))),
    }
  }
}

/// A write captured while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWriteRecord {
  pub category: Category,
  pub id: String,
  pub payload: Value,
  pub queued_at: DateTime<Utc>,
}

/// Durable queue of pending writes.
pub trait PendingWriteQueue: Send + Sync {
  /// Append a record. A record with an existing id replaces its payload in place.
  fn push(&self, category: Category, id: &str, payload: &Value) -> Result<PendingWriteRecord>;

  /// All records of a category, oldest first.
  fn list(&self, category: Category) -> Result<Vec<PendingWriteRecord>>;

  /// Remove one record. Returns whether it was present.
  fn remove(&self, category: Category, id: &str) -> Result<bool>;
}

impl PendingWriteQueue for SqliteStorage {
  fn push(&self, category: Category, id: &str, payload: &Value) -> Result<PendingWriteRecord> {
    let conn = self.lock()?;
    // A replaced record keeps its original queued_at
    let queued_at: String = conn.query_row(
      "INSERT INTO pending_writes (category, record_id, payload, queued_at)
       VALUES (?, ?, ?, ?)
       ON CONFLICT (category, record_id) DO UPDATE SET payload = excluded.payload
       RETURNING queued_at",
      params![
        category.as_str(),
        id,
        payload.to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
      ],
      |row| row.get(0),
    )?;

    Ok(PendingWriteRecord {
      category,
      id: id.to_string(),
      payload: payload.clone(),
      queued_at: parse_datetime(&queued_at)?,
    })
  }

  fn list(&self, category: Category) -> Result<Vec<PendingWriteRecord>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT record_id, payload, queued_at FROM pending_writes
       WHERE category = ?
       ORDER BY seq",
    )?;

    let rows = stmt
      .query_map(params![category.as_str()], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(id, payload, queued_at)| -> Result<PendingWriteRecord> {
        Ok(PendingWriteRecord {
          category,
          id,
          payload: serde_json::from_str(&payload)?,
          queued_at: parse_datetime(&queued_at)?,
        })
      })
      .collect()
  }

  fn remove(&self, category: Category, id: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM pending_writes WHERE category = ? AND record_id = ?",
      params![category.as_str(), id],
    )?;
    Ok(removed > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_list_preserves_append_order_per_category() {
    let queue = SqliteStorage::open_in_memory().unwrap();
    queue.push(Category::Cart, "c1", &json!({"sku": "A"})).unwrap();
    queue.push(Category::Quotes, "q1", &json!({"school": "X"})).unwrap();
    queue.push(Category::Cart, "c2", &json!({"sku": "B"})).unwrap();

    let cart: Vec<String> = queue
      .list(Category::Cart)
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(cart, vec!["c1", "c2"]);
    assert_eq!(queue.list(Category::Quotes).unwrap().len(), 1);
  }

  #[test]
  fn test_push_same_id_replaces_payload() {
    let queue = SqliteStorage::open_in_memory().unwrap();
    let first = queue.push(Category::Cart, "c1", &json!({"qty": 1})).unwrap();
    let replaced = queue.push(Category::Cart, "c1", &json!({"qty": 2})).unwrap();

    let records = queue.list(Category::Cart).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, json!({"qty": 2}));
    assert_eq!(replaced.queued_at, first.queued_at);
    assert_eq!(records[0], replaced);
  }

  #[test]
  fn test_remove_only_touches_matching_category() {
    let queue = SqliteStorage::open_in_memory().unwrap();
    queue.push(Category::Cart, "1", &json!({})).unwrap();
    queue.push(Category::Quotes, "1", &json!({})).unwrap();

    assert!(queue.remove(Category::Cart, "1").unwrap());
    assert!(!queue.remove(Category::Cart, "1").unwrap());
    assert!(queue.list(Category::Cart).unwrap().is_empty());
    assert_eq!(queue.list(Category::Quotes).unwrap().len(), 1);
  }

  #[test]
  fn test_category_parse() {
    assert_eq!("Cart".parse::<Category>().unwrap(), Category::Cart);
    assert_eq!("quotes".parse::<Category>().unwrap(), Category::Quotes);
    assert!("wishlist".parse::<Category>().is_err());
  }
}
