//! Content store: named store generations mapping request identities to
//! response snapshots.
//!
//! - Entries are keyed by (method, URL) and only GET responses are kept
//! - Every write is a single transaction, so readers never see a partial entry
//! - Generations are whole stores, created at install and purged at activation

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::{CacheEntry, CacheStorage, Identity, StoreHandle};

pub(crate) use storage::parse_datetime;
