mod config;
mod controller;
mod fetch;
mod router;
mod store;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use controller::{Generation, OfflineController};
use fetch::{FetchedResponse, Fetcher, HttpFetcher, OfflineFetcher, Request};
use store::{age_display, CacheBackend, SqliteBackend};

#[derive(Parser, Debug)]
#[command(name = "snapcache")]
#[command(about = "Offline cache controller for the screenshot viewer web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/snapcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Prefetch the asset manifest into the current generation's precache
  Install,
  /// Install the current generation, purge superseded ones, and go live
  Activate,
  /// Fetch a URL through the controller, falling back to cache when offline
  Get {
    /// Root-relative path or absolute URL
    url: String,
    /// Serve from cache only; never touch the network
    #[arg(long)]
    offline: bool,
  },
  /// Show cache stores, entry counts, and freshness
  Status,
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g. RUST_LOG=debug).
fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(filter)
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  init_tracing();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let backend = Arc::new(open_backend(&config)?);
  let generation = Generation::new(config.version.clone());

  match args.command {
    Command::Install => {
      let fetcher = Arc::new(HttpFetcher::new(&config.origin)?);
      let mut controller =
        OfflineController::new(backend, fetcher, generation, config.precache.clone());
      controller.install().await?;
      println!(
        "installed generation {} ({} assets precached)",
        config.version,
        config.precache.len()
      );
    }
    Command::Activate => {
      let fetcher = Arc::new(HttpFetcher::new(&config.origin)?);
      let mut controller =
        OfflineController::new(backend, fetcher, generation, config.precache.clone());
      controller.install().await?;
      controller.activate()?;
      println!("generation {} active", config.version);
    }
    Command::Get { url, offline } => {
      let request = Request::new(&url)?;
      let response = if offline {
        route_once(backend, Arc::new(OfflineFetcher), generation, &config, &request).await?
      } else {
        let fetcher = Arc::new(HttpFetcher::new(&config.origin)?);
        route_once(backend, fetcher, generation, &config, &request).await?
      };
      print_response(&url, &response);
    }
    Command::Status => {
      print_status(backend.as_ref())?;
    }
  }

  Ok(())
}

fn open_backend(config: &Config) -> Result<SqliteBackend> {
  match &config.cache_path {
    Some(path) => SqliteBackend::open(path),
    None => SqliteBackend::open_default(),
  }
}

/// Attach to the installed generation and route a single request.
async fn route_once<B: CacheBackend, F: Fetcher>(
  backend: Arc<B>,
  fetcher: Arc<F>,
  generation: Generation,
  config: &Config,
  request: &Request,
) -> Result<FetchedResponse> {
  let controller =
    OfflineController::attach(backend, fetcher, generation, config.precache.clone())?;
  controller.handle(request).await
}

fn print_response(url: &str, response: &FetchedResponse) {
  println!("{} -> {}", url, response.status);

  match response.content_type.as_deref() {
    Some(ct) if ct.contains("json") => {
      match serde_json::from_slice::<serde_json::Value>(&response.body) {
        Ok(value) => {
          println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default())
        }
        Err(_) => println!("{}", String::from_utf8_lossy(&response.body)),
      }
    }
    Some(ct) if ct.starts_with("text/") => {
      println!("{}", String::from_utf8_lossy(&response.body))
    }
    _ => println!("({} bytes)", response.body.len()),
  }
}

fn print_status<B: CacheBackend>(backend: &B) -> Result<()> {
  let names = backend.store_names()?;
  if names.is_empty() {
    println!("no cache stores");
    return Ok(());
  }

  for name in names {
    let count = backend.entry_count(&name)?;
    match backend.latest_stored_at(&name)? {
      Some(at) => println!("{:<24} {:>5} entries  updated {}", name, count, age_display(at)),
      None => println!("{:<24} {:>5} entries", name, count),
    }
  }

  Ok(())
}
