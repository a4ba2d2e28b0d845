//! Shared utilities for CLI commands

use anyhow::Result;
use dirwatch_core::paths;
use std::path::{Path, PathBuf};
use watcher::WatcherConfig;

/// Default config location, relative to the home directory
const DEFAULT_CONFIG: &str = ".config/dirwatch/config.toml";

pub fn default_config_path() -> PathBuf {
    paths::join(&paths::expand_home(Path::new("~")), Path::new(DEFAULT_CONFIG))
}

/// Load the config from `explicit`, else the default location, else defaults
///
/// An explicitly named file must exist; the default one is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<WatcherConfig> {
    if let Some(path) = explicit {
        return WatcherConfig::load(&paths::expand_home(path));
    }

    let default_path = default_config_path();
    if default_path.is_file() {
        tracing::debug!("Using config {}", default_path.display());
        return WatcherConfig::load(&default_path);
    }
    Ok(WatcherConfig::default())
}
