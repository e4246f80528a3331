use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ocagent::config::Config;
use ocagent::{
  CacheStorage, Destination, HttpFetcher, Intercepted, OfflineAgent, Registration, Request,
  SqliteStorage,
};

#[derive(Parser, Debug)]
#[command(name = "ocagent")]
#[command(about = "Offline cache agent: versioned response caching with offline fallback")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./ocagent.yaml or $XDG_CONFIG_HOME/ocagent/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-fetch the manifest into the configured generation
  Install,
  /// Delete every generation except the configured one
  Activate,
  /// Install, then activate if installation succeeded
  Deploy,
  /// Answer one request the way the agent would
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    /// Kind of resource being requested
    #[arg(short, long, value_enum, default_value_t = Destination::Empty)]
    destination: Destination,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// Extra request header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(long)]
    data: Option<String>,
    /// Write the body to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List stored generations
  Generations,
}

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG controls the level (default: warn). With a log file configured,
/// output goes there through a non-blocking writer; keep the guard alive.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let Some(path) = log_file else {
    tracing_subscriber::registry()
      .with(fmt::layer().with_writer(std::io::stderr))
      .with(filter)
      .init();
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::never(dir, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();

  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(config.log_file.as_deref())?;

  let agent_config = config.agent_config()?;
  let database = config.database_path()?;
  info!(cache = %agent_config.cache_name, database = %database.display(), "starting");

  let storage = Arc::new(SqliteStorage::open(&database)?);
  let fetcher = Arc::new(HttpFetcher::new(agent_config.origin.clone())?);
  let agent = OfflineAgent::new(agent_config.clone(), Arc::clone(&storage), Arc::clone(&fetcher));

  match args.command {
    Command::Install => {
      let report = agent.on_install().await?;
      println!("Installed {} entries into {}", report.stored, report.cache_name);
    }
    Command::Activate => {
      let report = agent.on_activate().await?;
      println!(
        "Activated {} (deleted {}, orphaned {})",
        report.cache_name,
        report.deleted.len(),
        report.orphaned.len()
      );
      for name in &report.orphaned {
        println!("  left behind: {}", name);
      }
    }
    Command::Deploy => {
      let registration = Registration::new(Arc::clone(&fetcher));
      let state = registration.register(agent).await?;
      registration.settle().await;
      println!("{} is {}", agent_config.cache_name, state);
    }
    Command::Fetch {
      url,
      destination,
      method,
      headers,
      data,
      output,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let mut request = Request::get(agent_config.resolve(&url)?)
        .with_method(method)
        .with_destination(destination);
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header {}: expected NAME:VALUE", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(data) = data {
        request = request.with_body(data);
      }

      let answer = agent.on_intercept(request).await;
      agent.settle().await;

      let source = answer.source();
      let response = match answer {
        Intercepted::Cached(r) | Intercepted::Network(r) | Intercepted::OfflineFallback(r) => r,
        Intercepted::Unavailable(e) => return Err(e.wrap_err(format!("No response for {}", url))),
      };

      eprintln!("{} {} ({})", response.status, response.status_text, source);
      match output {
        Some(path) => std::fs::write(&path, &response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout()
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write response body: {}", e))?,
      }
    }
    Command::Generations => {
      for generation in storage.generations()? {
        let marker = if generation.name == agent_config.cache_name {
          "*"
        } else {
          " "
        };
        println!(
          "{} {}  {} entries  created {}",
          marker,
          generation.name,
          generation.entries,
          generation.created_at.format("%Y-%m-%d %H:%M:%S")
        );
      }
    }
  }

  Ok(())
}
