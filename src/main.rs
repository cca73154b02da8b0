mod cache;
mod config;
mod net;
mod notify;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cache::{CacheStorage, MemoryStorage, SqliteStorage};
use config::{Config, WorkerConfig};
use net::{HttpFetcher, Request, RequestMode};
use notify::LogNotifier;
use worker::{CacheWorker, EventOutcome, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "offline-cache")]
#[command(about = "A versioned, cache-first asset worker with offline fallback")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-cache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache database path, overriding the configured one
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long, global = true, conflicts_with = "db")]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest into the current version's partition
  Install,
  /// Delete partitions left over from older versions
  Activate,
  /// Install, then activate
  Update,
  /// Dispatch a fetch event for a path or absolute URL
  Fetch {
    target: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request mode: same-origin, cors or no-cors
    #[arg(long, default_value = "no-cors")]
    mode: String,
    /// Extra request header as "name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Write the response body to stdout
    #[arg(long)]
    body: bool,
  },
  /// Dispatch a push event
  Push { payload: Option<String> },
  /// List partitions and their entries
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(db) = args.db {
    config.storage.path = Some(db);
  }

  if args.ephemeral {
    return run(config, args.command, MemoryStorage::new()).await;
  }

  let storage = match &config.storage.path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open_default()?,
  };
  run(config, args.command, storage).await
}

/// Log to stderr through a non-blocking writer; the guard flushes on drop.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
  let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_cache=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_target(false)
    .init();

  guard
}

async fn run<S: CacheStorage + 'static>(config: Config, command: Command, storage: S) -> Result<()> {
  let storage = Arc::new(storage);
  let print_body = matches!(command, Command::Fetch { body: true, .. });

  let (fresh, events) = match command {
    Command::Status => return print_status(&config.worker, storage.as_ref()),
    Command::Install => (true, vec![WorkerEvent::Install]),
    Command::Update => (true, vec![WorkerEvent::Install, WorkerEvent::Activate]),
    Command::Activate => (false, vec![WorkerEvent::Activate]),
    Command::Fetch {
      target,
      method,
      mode,
      headers,
      ..
    } => {
      let request = build_request(&config.worker, &target, &method, &mode, &headers)?;
      (false, vec![WorkerEvent::FetchIntercept(request)])
    }
    Command::Push { payload } => (false, vec![WorkerEvent::Push(payload)]),
  };

  let fetcher = Arc::new(HttpFetcher::new(&config.worker, config.request_timeout())?);
  let notifier = Arc::new(LogNotifier);
  let worker = if fresh {
    CacheWorker::new(config.worker, storage, fetcher, notifier)?
  } else {
    CacheWorker::wake(config.worker, storage, fetcher, notifier)?
  };

  let mut result = Ok(());
  for event in events {
    match worker.dispatch(event).await {
      Ok(outcome) => report(worker.version(), outcome, print_body)?,
      Err(e) => {
        result = Err(e);
        break;
      }
    }
  }

  // Let background stores finish before the process exits.
  worker.pending().wait_idle().await;
  result
}

fn build_request(
  config: &WorkerConfig,
  target: &str,
  method: &str,
  mode: &str,
  headers: &[String],
) -> Result<Request> {
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|_| eyre!("Invalid HTTP method: {}", method))?;
  let mode = RequestMode::parse(mode).ok_or_else(|| eyre!("Invalid request mode: {}", mode))?;

  let mut request = Request::get(config.resolve(target)?)
    .with_method(method)
    .with_mode(mode);

  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid header '{}', expected \"name: value\"", header))?;
    request = request.with_header(name.trim(), value.trim());
  }

  Ok(request)
}

fn report(version: &str, outcome: EventOutcome, print_body: bool) -> Result<()> {
  match outcome {
    EventOutcome::Installed { cached } => {
      println!("installed {} ({} assets cached)", version, cached);
    }
    EventOutcome::Activated { deleted } => {
      if deleted.is_empty() {
        println!("activated {} (no stale caches)", version);
      } else {
        println!("activated {} (deleted {})", version, deleted.join(", "));
      }
    }
    EventOutcome::Responded(result) => {
      let response = &result.response;
      if print_body {
        std::io::stdout()
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write response body: {}", e))?;
      } else {
        println!(
          "{} {} [{}] {} bytes, {} from {}",
          response.status,
          response.status_text,
          response.response_type,
          response.body.len(),
          response.header("content-type").unwrap_or("-"),
          result.source.as_str()
        );
      }
    }
    EventOutcome::Notified(notification) => {
      println!("{}: {}", notification.title, notification.body);
    }
  }
  Ok(())
}

fn print_status<S: CacheStorage>(config: &WorkerConfig, storage: &S) -> Result<()> {
  let names = storage.names()?;
  if names.is_empty() {
    println!("no cache partitions");
    return Ok(());
  }

  for name in names {
    let marker = if name == config.version { "*" } else { " " };
    let entries = storage.entries(&name)?;
    let state = storage
      .state(&name)?
      .map(|s| s.as_str())
      .unwrap_or("-");
    println!("{} {} [{}] ({} entries)", marker, name, state, entries.len());

    for key in entries {
      let stored_at = storage
        .get(&name, &key)?
        .map(|cached| cached.stored_at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
      println!("    {}  {}", stored_at, key);
    }
  }
  Ok(())
}
