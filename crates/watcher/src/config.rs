//! Watcher configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! yields a working configuration.

use anyhow::{bail, Context, Result};
use dirwatch_core::IgnoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How a subscribed path is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// OS change notifications
    #[default]
    Native,
    /// Periodic snapshot sweeps
    Polling,
}

/// Thresholds that trigger stream consolidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationLimits {
    /// Consolidate once more than this many dead paths accumulate
    #[serde(default = "default_max_dead_paths")]
    pub max_dead_paths: u64,

    /// Consolidate once more than this many streams are alive
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,
}

fn default_max_dead_paths() -> u64 {
    4
}

fn default_max_streams() -> usize {
    3
}

impl Default for ConsolidationLimits {
    fn default() -> Self {
        Self {
            max_dead_paths: default_max_dead_paths(),
            max_streams: default_max_streams(),
        }
    }
}

/// Configuration for a [`crate::WatcherFacade`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Mode used by `subscribe`
    #[serde(default)]
    pub mode: WatchMode,

    /// Interval between polling sweeps, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub consolidation: ConsolidationLimits,

    /// Extra ignore patterns on top of the built-in names
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            consolidation: ConsolidationLimits::default(),
            ignore: IgnoreConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.consolidation.max_streams == 0 {
            bail!("consolidation.max_streams must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
