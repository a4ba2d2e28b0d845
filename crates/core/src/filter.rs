//! Ignore filter applied to directory listings
//!
//! Two sources of patterns:
//! 1. Built-in names (VCS metadata, OS droppings, editor temp files - always active)
//! 2. Config-based gitignore-style patterns (optional)

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Entry names that are never reported
const BUILTIN_NAMES: &[&str] = &[
    ".",
    "..",
    ".git",
    ".hg",
    ".svn",
    ".jj",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "__pycache__",
];

/// Ignore filter for listings and sweeps
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    /// Compiled additional patterns (None when no patterns configured)
    extra: Option<Gitignore>,
}

impl IgnoreFilter {
    /// Build a filter from configuration
    ///
    /// Invalid patterns are skipped with a warning rather than failing.
    pub fn new(config: &IgnoreConfig) -> Self {
        if config.additional_patterns.is_empty() {
            return Self { extra: None };
        }

        let mut builder = GitignoreBuilder::new("");
        for pattern in &config.additional_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                warn!("Skipping invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        let extra = match builder.build() {
            Ok(gitignore) => Some(gitignore),
            Err(e) => {
                warn!("Failed to compile ignore patterns: {}", e);
                None
            }
        };
        Self { extra }
    }

    /// Filter with only the built-in names
    pub fn builtin() -> Self {
        Self { extra: None }
    }

    /// Check whether an entry should be skipped
    ///
    /// `relative` is the entry's path relative to the listed root; its last
    /// component is the entry name.
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        let name = match relative.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };

        if is_builtin_ignored(name) {
            return true;
        }

        match &self.extra {
            Some(gitignore) => gitignore.matched(relative, is_dir).is_ignore(),
            None => false,
        }
    }

    /// Number of active pattern sources
    pub fn active_sources(&self) -> usize {
        1 + usize::from(self.extra.is_some())
    }
}

impl Default for IgnoreFilter {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Check an entry name against the built-in list and editor temp files
///
/// Covers: VCS metadata, MacOS/Windows system files, Vim/Emacs swap,
/// backup and lock files.
fn is_builtin_ignored(name: &str) -> bool {
    if BUILTIN_NAMES.contains(&name) {
        return true;
    }

    // MacOS resource forks
    if name.starts_with("._") {
        return true;
    }

    // Vim swap files
    if name.ends_with(".swp") || name.ends_with(".swo") || name.ends_with(".swx") {
        return true;
    }

    // Vim/Emacs backup files
    if name.ends_with('~') {
        return true;
    }

    // Emacs auto-save (#*#) and lock (.#*) files
    if (name.len() > 1 && name.starts_with('#') && name.ends_with('#')) || name.starts_with(".#") {
        return true;
    }

    false
}

/// Ignore configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Additional gitignore-style patterns
    #[serde(default)]
    pub additional_patterns: Vec<String>,
}
