//! Change events delivered to subscribers

use crate::metadata::MetadataRecord;
use std::fmt;
use std::path::{Path, PathBuf};

/// Direction and magnitude of a size change on modification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeDelta {
    /// Entry grew by this many bytes
    Grew(u64),
    /// Entry shrank by this many bytes
    Shrank(u64),
    /// Size stayed the same (only the mtime moved)
    Unchanged,
    /// Not known (native notifications carry no metadata)
    Unknown,
}

impl SizeDelta {
    /// Compute the delta between two metadata records
    pub fn between(previous: &MetadataRecord, current: &MetadataRecord) -> Self {
        use std::cmp::Ordering;
        match current.size.cmp(&previous.size) {
            Ordering::Greater => Self::Grew(current.size - previous.size),
            Ordering::Less => Self::Shrank(previous.size - current.size),
            Ordering::Equal => Self::Unchanged,
        }
    }
}

impl fmt::Display for SizeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grew(n) => write!(f, "+{} bytes", n),
            Self::Shrank(n) => write!(f, "-{} bytes", n),
            Self::Unchanged => write!(f, "+0 bytes"),
            Self::Unknown => write!(f, "size unknown"),
        }
    }
}

/// A single filesystem change, carrying the canonical path of the entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Entry appeared
    Added(PathBuf),
    /// Entry's modification time changed
    Modified(PathBuf, SizeDelta),
    /// Entry disappeared
    Removed(PathBuf),
}

impl ChangeEvent {
    /// Path of the entry that changed
    pub fn path(&self) -> &Path {
        match self {
            Self::Added(p) | Self::Modified(p, _) | Self::Removed(p) => p,
        }
    }

    /// Short label for the kind of change
    pub fn label(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(..) => "modified",
            Self::Removed(_) => "removed",
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modified(path, delta) => {
                write!(f, "modified {} ({})", path.display(), delta)
            }
            other => write!(f, "{} {}", other.label(), other.path().display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntryKind;
    use std::time::UNIX_EPOCH;

    fn record(size: u64) -> MetadataRecord {
        MetadataRecord {
            size,
            modified: UNIX_EPOCH,
            kind: EntryKind::File,
        }
    }

    #[test]
    fn test_size_delta_between() {
        assert_eq!(SizeDelta::between(&record(10), &record(15)), SizeDelta::Grew(5));
        assert_eq!(SizeDelta::between(&record(15), &record(10)), SizeDelta::Shrank(5));
        assert_eq!(SizeDelta::between(&record(7), &record(7)), SizeDelta::Unchanged);
    }

    #[test]
    fn test_display() {
        let event = ChangeEvent::Modified(PathBuf::from("/w/a.glsl"), SizeDelta::Shrank(3));
        assert_eq!(event.to_string(), "modified /w/a.glsl (-3 bytes)");

        let event = ChangeEvent::Removed(PathBuf::from("/w/b"));
        assert_eq!(event.to_string(), "removed /w/b");
        assert_eq!(event.path(), Path::new("/w/b"));
    }
}
