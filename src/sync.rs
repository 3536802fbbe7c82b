//! Reconciliation worker: replays queued offline writes once connectivity
//! returns.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::http::Request;
use crate::network::Network;
use crate::queue::{Category, PendingWriteQueue};

/// Tag carried by a connectivity-restored signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  CartSync,
  QuoteSync,
}

impl SyncTag {
  pub fn category(&self) -> Category {
    match self {
      SyncTag::CartSync => Category::Cart,
      SyncTag::QuoteSync => Category::Quotes,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::CartSync => "cart-sync",
      SyncTag::QuoteSync => "quote-sync",
    }
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SyncTag {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim() {
      "cart-sync" | "background-sync-cart" => Ok(SyncTag::CartSync),
      "quote-sync" | "quotes-sync" | "background-sync-quotes" => Ok(SyncTag::QuoteSync),
      other => Err(Error::Config(format!("Unknown sync tag: {}", other))),
    }
  }
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone)]
pub struct SyncReport {
  pub category: Category,
  /// Records acknowledged by the remote and removed from the queue
  pub submitted: Vec<String>,
  /// Records left queued for the next trigger
  pub failed: Vec<String>,
}

impl SyncReport {
  fn new(category: Category) -> Self {
    Self {
      category,
      submitted: Vec::new(),
      failed: Vec::new(),
    }
  }
}

pub struct ReconciliationWorker<Q: PendingWriteQueue, N: Network> {
  queue: Arc<Q>,
  network: Arc<N>,
  config: Arc<WorkerConfig>,
}

impl<Q: PendingWriteQueue, N: Network> ReconciliationWorker<Q, N> {
  pub fn new(queue: Arc<Q>, network: Arc<N>, config: Arc<WorkerConfig>) -> Self {
    Self {
      queue,
      network,
      config,
    }
  }

  /// Submit every record queued for the tag's category at call time.
  ///
  /// A record is removed only after a 2xx acknowledgment. Failures are
  /// per-record: the record stays queued and the batch carries on. Records
  /// appended while the batch runs wait for the next trigger.
  pub async fn run(&self, tag: SyncTag) -> Result<SyncReport> {
    let category = tag.category();
    let endpoint = self.config.endpoint(category);
    let snapshot = self.queue.list(category)?;
    let mut report = SyncReport::new(category);
    debug!(%tag, pending = snapshot.len(), "Background sync triggered");

    for record in snapshot {
      let request = Request::new(Method::POST, endpoint.clone()).with_json(&record.payload);

      let submitted = match self.network.fetch(&request).await {
        Ok(response) if response.is_success() => true,
        Ok(response) => {
          warn!(%category, id = %record.id, status = response.status, "Submission rejected");
          false
        }
        Err(e) => {
          warn!(%category, id = %record.id, error = %e, "Failed to submit pending write");
          false
        }
      };

      if !submitted {
        report.failed.push(record.id);
        continue;
      }

      match self.queue.remove(category, &record.id) {
        Ok(_) => report.submitted.push(record.id),
        Err(e) => {
          warn!(%category, id = %record.id, error = %e, "Submitted but could not dequeue");
          report.failed.push(record.id);
        }
      }
    }

    info!(
      %tag,
      submitted = report.submitted.len(),
      failed = report.failed.len(),
      "Background sync finished"
    );
    Ok(report)
  }
}
