//! Path helpers: home shorthand, canonicalization, joining

use crate::error::{Result, WatchError};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` or `~/` to the user's home directory
///
/// Paths such as `~user/...` are left untouched, as is everything when
/// the home directory cannot be determined.
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Resolve a user-supplied path to its canonical absolute form
///
/// Expands `~`, then resolves symlinks and `..` like `realpath(3)`.
/// Fails with [`WatchError::PathResolution`] if the path does not exist
/// or cannot be accessed.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(WatchError::path_resolution(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "empty path"),
        ));
    }

    let expanded = expand_home(path);
    std::fs::canonicalize(&expanded).map_err(|e| WatchError::path_resolution(expanded, e))
}

/// Join `rest` onto `base`, treating `rest` as relative
///
/// Unlike [`Path::join`], a leading separator on `rest` does not replace
/// `base`: `join("/a", "/b")` is `/a/b`.
pub fn join(base: &Path, rest: &Path) -> PathBuf {
    let relative: PathBuf = rest
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    base.join(relative)
}

/// Whether `path` is `root` or lies underneath it
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_join_treats_rest_as_relative() {
        assert_eq!(join(Path::new("/a"), Path::new("b")), PathBuf::from("/a/b"));
        assert_eq!(join(Path::new("/a/"), Path::new("b")), PathBuf::from("/a/b"));
        assert_eq!(join(Path::new("/a"), Path::new("/b")), PathBuf::from("/a/b"));
        assert_eq!(join(Path::new("/a/"), Path::new("/b/c")), PathBuf::from("/a/b/c"));
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~")), home);
            assert_eq!(expand_home(Path::new("~/src")), home.join("src"));
        }

        // Not shorthand
        assert_eq!(expand_home(Path::new("/tmp/~")), PathBuf::from("/tmp/~"));
        assert_eq!(expand_home(Path::new("~other/x")), PathBuf::from("~other/x"));
    }

    #[test]
    fn test_canonicalize_resolves_dot_dot() {
        let temp_dir = TempDir::new().unwrap();
        let sub = temp_dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let messy = sub.join("..").join("sub");
        let resolved = canonicalize(&messy).unwrap();
        assert_eq!(resolved, fs::canonicalize(&sub).unwrap());
        assert!(resolved.is_absolute());
    }

    #[test]
    fn test_canonicalize_missing_path_is_resolution_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = canonicalize(temp_dir.path().join("does-not-exist")).unwrap_err();
        assert!(matches!(err, WatchError::PathResolution { .. }));
        assert!(!err.is_retryable());

        assert!(canonicalize("").is_err());
    }

    #[test]
    fn test_is_within() {
        assert!(is_within(Path::new("/a/b/c"), Path::new("/a/b")));
        assert!(is_within(Path::new("/a/b"), Path::new("/a/b")));
        assert!(!is_within(Path::new("/a/bc"), Path::new("/a/b")));
    }
}
