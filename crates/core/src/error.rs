//! Error taxonomy for the watch engine

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the watch engine
///
/// None of these are fatal to the engine itself: a failed subscription or a
/// failed consolidation leaves prior watches fully functional.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Path does not exist or is inaccessible (not retryable)
    #[error("cannot resolve path '{}': {source}", path.display())]
    PathResolution {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The OS refused to create a watch resource (e.g. descriptor exhaustion)
    #[error("failed to create watch stream for {} path(s): {source}", paths.len())]
    OsResource {
        paths: Vec<PathBuf>,
        #[source]
        source: notify::Error,
    },

    /// Metadata query failed mid-sweep; the entry is retried next cycle
    #[error("stat failed for '{}': {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WatchError {
    /// Build a path resolution error
    pub fn path_resolution(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PathResolution {
            path: path.into(),
            source,
        }
    }

    /// Build a stat error
    pub fn stat(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Stat {
            path: path.into(),
            source,
        }
    }

    /// Whether a later attempt may succeed without caller intervention
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PathResolution { .. })
    }

    /// The path the error is about (first path for stream errors)
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::PathResolution { path, .. } | Self::Stat { path, .. } => Some(path),
            Self::OsResource { paths, .. } => paths.first().map(PathBuf::as_path),
        }
    }
}

/// Result alias for watch engine operations
pub type Result<T> = std::result::Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let missing = WatchError::path_resolution("/nope", io::Error::from(io::ErrorKind::NotFound));
        assert!(!missing.is_retryable());

        let stat = WatchError::stat("/tmp/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(stat.is_retryable());

        let os = WatchError::OsResource {
            paths: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            source: notify::Error::generic("too many open files"),
        };
        assert!(os.is_retryable());
        assert_eq!(os.path(), Some(Path::new("/a")));
    }

    #[test]
    fn test_display_mentions_path() {
        let err = WatchError::path_resolution("/missing/dir", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.to_string().contains("/missing/dir"));
    }
}
