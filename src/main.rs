use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use focusflow_cache::{
  Config, HttpTransport, Lifecycle, MessageReply, Request, SqliteStore, WorkerMessage,
};

#[derive(Parser, Debug)]
#[command(name = "ffsw")]
#[command(about = "Offline cache worker for FocusFlow")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ffsw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the cache database (default: platform data dir)
  #[arg(long)]
  cache_db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the asset manifest into a new generation (all-or-nothing)
  Install,
  /// Garbage-collect stale generations and take over routing
  Activate,
  /// Route one request through the cache tiers and print the result
  Fetch {
    /// Absolute URL to fetch
    url: String,
    /// Treat as a top-level navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Run one background sync cycle now
  Sync,
  /// Print the per-tier usage report
  Usage,
  /// Queue a JSON payload for background sync
  StoreOffline {
    /// JSON payload
    json: String,
  },
  /// Install, activate and run periodic sync/eviction until interrupted
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  init_tracing()?;

  let args = Args::parse();
  let config = Arc::new(Config::load(args.config.as_deref())?);

  let store = Arc::new(match &args.cache_db {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  });
  let transport = Arc::new(HttpTransport::new()?);
  let mut lifecycle = Lifecycle::new(store, transport, config);

  match args.command {
    Command::Install => {
      lifecycle.install().await?;
      println!("installed, waiting for activation");
    }
    Command::Activate => {
      lifecycle.activate().await?;
      println!("activated");
    }
    Command::Fetch { url, navigate } => {
      let request = if navigate {
        Request::navigate(&url)?
      } else {
        Request::get(&url)?
      };
      lifecycle.activate().await?;
      let resp = lifecycle.handle_fetch(&request).await;
      eprintln!(
        "{} {} ({:?}, {} bytes)",
        resp.status,
        resp.content_type.as_deref().unwrap_or("-"),
        resp.source,
        resp.body.len()
      );
      use std::io::Write;
      std::io::stdout().write_all(&resp.body)?;
    }
    Command::Sync => {
      let report = lifecycle.coordinator().sync().await;
      println!(
        "sent {} records ({} failed), activity synced: {}, assets refreshed: {}",
        report.records_sent, report.records_failed, report.activity_synced, report.assets_refreshed
      );
    }
    Command::Usage => {
      let report = lifecycle.usage()?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::StoreOffline { json } => {
      let data: serde_json::Value = serde_json::from_str(&json)?;
      let reply = lifecycle
        .handle_message(WorkerMessage::StoreOfflineData(data))
        .await?;
      if matches!(reply, MessageReply::Ack) {
        println!("queued");
      }
    }
    Command::Run => {
      lifecycle.skip_waiting().await?;
      lifecycle.install().await?;
      info!("worker active, entering periodic sync loop");
      lifecycle.coordinator().run_periodic().await;
    }
  }

  Ok(())
}

/// Log to stderr and a daily-rotated file in the platform data dir.
fn init_tracing() -> Result<()> {
  use tracing_subscriber::fmt::writer::MakeWriterExt;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  if let Some(data_dir) = dirs::data_dir() {
    let appender = tracing_appender::rolling::daily(data_dir.join("ffsw").join("logs"), "ffsw.log");
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(appender.and(std::io::stderr))
      .init();
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
  }

  Ok(())
}
