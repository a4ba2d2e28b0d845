//! Show the effective configuration

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use watcher::WatcherConfig;

pub fn run(config: &WatcherConfig) -> Result<()> {
    let default_path = util::default_config_path();
    println!("{}", "Effective Configuration".bold());
    println!(
        "{}: {}\n",
        "Default location".dimmed(),
        default_path.display().dimmed()
    );

    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    print!("{}", rendered);
    Ok(())
}
