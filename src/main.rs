mod app;
mod backend;
mod cache;
mod commands;
mod config;
mod error;
mod event;
mod gateway;
mod logging;
mod query;
mod realtime;
mod render;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vihang")]
#[command(about = "Share community stories and connect them with NGOs that can help")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./vihang.yaml, then $XDG_CONFIG_HOME/vihang/config.yaml)
  #[arg(short = 'C', long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let log_guard = logging::init(&config.log)?;

  let app = app::App::connect(config)?;
  let mut stdout = std::io::stdout();

  match app.run(args.command, &mut stdout).await {
    Ok(()) => Ok(()),
    Err(report) => match report.downcast_ref::<error::Error>() {
      Some(e) => {
        eprintln!("{}", render::error_message(e));
        drop(log_guard);
        std::process::exit(1);
      }
      None => Err(report),
    },
  }
}
