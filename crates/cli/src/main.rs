//! Dirwatch CLI - dirwatch command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod util;

/// Dirwatch - change notifications for directories
#[derive(Parser)]
#[command(name = "dirwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/dirwatch/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print changes under one or more directories
    Watch {
        /// Directories to watch
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Poll with snapshot sweeps instead of native notifications
        #[arg(long)]
        poll: bool,

        /// Poll interval in milliseconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,

        /// Exit after this many events
        #[arg(long)]
        count: Option<usize>,
    },
    /// List the entries a sweep of a directory records
    Snapshot {
        /// Root directory
        root: PathBuf,
    },
    /// Show the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = util::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch { paths, poll, interval, count } => {
            cmd::watch::run(config, &paths, poll, interval, count)
        }
        Commands::Snapshot { root } => cmd::snapshot::run(&config, &root),
        Commands::Config => cmd::config::run(&config),
    }
}
