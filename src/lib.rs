//! Offline-first request interception cache.
//!
//! Each intercepted request is classified and run through one of four
//! cache/network strategies backed by a versioned content store. A lifecycle
//! manager installs and retires store generations, and a reconciliation
//! worker replays writes queued while offline once connectivity returns.
//! [`worker::ServiceWorker`] is the entry point a host drives.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod queue;
pub mod strategy;
pub mod sync;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
