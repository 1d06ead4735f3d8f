mod api;
mod app;
mod cache;
mod config;
mod context;
mod event;
mod job;
mod poll;
mod prefs;
mod stream;
mod ui;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "listsync-dash")]
#[command(about = "A terminal dashboard for a media list sync service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/listsync-dash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the sync service, overrides the config file
  #[arg(short, long)]
  url: Option<String>,

  /// Do not open the server-sent event stream, rely on polling only
  #[arg(long)]
  no_stream: bool,
}

/// Log to a daily file; the terminal belongs to the UI.
fn init_tracing() -> Result<WorkerGuard> {
  let log_dir = prefs::PrefsStore::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "listsync-dash.log"));
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing()?;

  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(url) = args.url {
    config.api.url = url;
  }
  if args.no_stream {
    config.stream.enabled = false;
  }

  let mut app = app::App::new(config)?;
  app.run().await?;

  Ok(())
}
