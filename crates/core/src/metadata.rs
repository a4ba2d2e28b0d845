//! Metadata captured per filesystem entry

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link (never followed)
    Symlink,
    /// Sockets, fifos, devices
    Other,
}

/// Snapshot of an entry's metadata, as returned by `lstat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataRecord {
    /// Size in bytes
    pub size: u64,
    /// Last data modification time
    pub modified: SystemTime,
    /// Entry kind
    pub kind: EntryKind,
}

impl MetadataRecord {
    /// Query metadata for `path` without following symlinks
    pub fn lstat(path: &Path) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    /// Build a record from already-fetched metadata
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        Self {
            size: metadata.len(),
            // Platforms without mtime report the epoch, which sweeps flag as ambiguous
            modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            kind,
        }
    }

    /// Whether this record describes a directory
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Whether the modification time is zero (ambiguous)
    pub fn has_zero_mtime(&self) -> bool {
        self.modified == UNIX_EPOCH
    }

    /// Change predicate: the modification time moved forward
    ///
    /// Size is not compared, and an mtime that moves backwards is not a change.
    pub fn is_modified_since(&self, previous: &MetadataRecord) -> bool {
        self.modified > previous.modified
    }
}
