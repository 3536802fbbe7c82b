use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use swcache::cache::{CacheStorage, SqliteStorage};
use swcache::config::Config;
use swcache::http::Request;
use swcache::network::HttpNetwork;
use swcache::queue::{Category, PendingWriteQueue};
use swcache::worker::{EventOutcome, HostEvent, MessageOutcome, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline-first request interception cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also write logs to a daily-rolling file in this directory
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the current generation's static cache from the manifest
  Install,
  /// Purge other generations and take over clients
  Activate,
  /// Run a request through the interception path
  Fetch {
    /// Absolute URL, or a path resolved against the origin
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// Accept header to send (use text/html for page navigations)
    #[arg(short, long)]
    accept: Option<String>,
  },
  /// Replay queued writes for a sync tag (cart-sync, quote-sync)
  Sync { tag: String },
  /// Queue a write for later submission
  Enqueue {
    category: String,
    id: String,
    /// JSON payload
    payload: String,
  },
  /// Deliver a host message, e.g. '{"type":"CACHE_PRODUCT","productId":"42"}'
  Message { json: String },
  /// Show store generations and queue depths
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = swcache::telemetry::init(args.log_dir.as_deref());

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let worker_config = config.worker_config()?;
  let storage = Arc::new(SqliteStorage::open_at(&config.database_path()?)?);
  let network = Arc::new(HttpNetwork::new()?);
  let worker = ServiceWorker::new(storage.clone(), network, worker_config);

  match args.command {
    Command::Install => {
      let outcome = worker.dispatch(HostEvent::Install).await?;
      print_outcome(&outcome);
      println!("state: {}", worker.lifecycle().state());
    }
    Command::Activate => {
      let outcome = worker.dispatch(HostEvent::Activate).await?;
      print_outcome(&outcome);
    }
    Command::Fetch {
      url,
      method,
      accept,
    } => {
      let url = worker.config().resolve(&url)?;
      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let mut request = Request::new(method, url);
      if let Some(accept) = accept {
        request = request.with_header("accept", accept);
      }
      let outcome = worker.dispatch(HostEvent::Fetch(request)).await?;
      print_outcome(&outcome);
    }
    Command::Sync { tag } => {
      let outcome = worker.dispatch(HostEvent::Sync(tag)).await?;
      print_outcome(&outcome);
    }
    Command::Enqueue {
      category,
      id,
      payload,
    } => {
      let category: Category = category.parse()?;
      let payload: Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
      let record = storage.push(category, &id, &payload)?;
      println!("queued {} {} at {}", record.category, record.id, record.queued_at);
    }
    Command::Message { json } => {
      let data: Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Message is not valid JSON: {}", e))?;
      let outcome = worker.dispatch(HostEvent::Message(data)).await?;
      print_outcome(&outcome);
    }
    Command::Status => print_status(&storage, worker.config())?,
  }

  Ok(())
}

fn print_outcome(outcome: &EventOutcome) {
  match outcome {
    EventOutcome::Installed { install, activate } => {
      println!("cached {} manifest assets", install.cached.len());
      for skipped in &install.skipped {
        println!("  skipped (cross-origin): {}", skipped);
      }
      if let Some(report) = activate {
        print_deleted(&report.deleted);
      }
    }
    EventOutcome::Activated(report) => print_deleted(&report.deleted),
    EventOutcome::Fetched(None) => println!("pass-through"),
    EventOutcome::Fetched(Some(served)) => {
      println!("# {:?} via {:?}", served.class, served.source);
      println!("{}", served.response);
    }
    EventOutcome::Synced(None) => println!("unknown sync tag, nothing to do"),
    EventOutcome::Synced(Some(report)) => {
      println!(
        "{}: {} submitted, {} still queued",
        report.category,
        report.submitted.len(),
        report.failed.len()
      );
    }
    EventOutcome::Message(MessageOutcome::SkippedWaiting(report)) => match report {
      Some(report) => print_deleted(&report.deleted),
      None => println!("not waiting"),
    },
    EventOutcome::Message(MessageOutcome::ProductCached { url, stored }) => {
      println!("{} {}", if *stored { "cached" } else { "not cached" }, url);
    }
    EventOutcome::Message(MessageOutcome::Ignored) => println!("message ignored"),
  }
}

fn print_deleted(deleted: &[String]) {
  if deleted.is_empty() {
    println!("activated, no old caches");
  }
  for name in deleted {
    println!("deleted old cache: {}", name);
  }
}

fn print_status(storage: &SqliteStorage, config: &swcache::config::WorkerConfig) -> Result<()> {
  for name in storage.list_names()? {
    let store = storage.open(&name)?;
    let marker = if config.is_current(&name) { "*" } else { " " };
    println!("{} {} ({} entries)", marker, name, storage.entries(&store)?.len());
  }
  for category in Category::ALL {
    println!("queue {}: {} pending", category, storage.list(category)?.len());
  }
  Ok(())
}
