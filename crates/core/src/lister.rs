//! Immediate-children directory listing with the ignore filter applied

use crate::error::{Result, WatchError};
use crate::filter::IgnoreFilter;
use crate::metadata::MetadataRecord;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One child of a listed directory
#[derive(Debug, Clone)]
pub struct ListedEntry {
    /// File name within the parent
    pub name: OsString,
    /// Absolute path (parent joined with name)
    pub path: PathBuf,
    /// Metadata captured via lstat
    pub metadata: MetadataRecord,
}

/// Result of listing one directory
///
/// Children whose metadata could not be read end up in `failures`
/// instead of `entries`.
#[derive(Debug, Default)]
pub struct Listing {
    pub entries: Vec<ListedEntry>,
    pub failures: Vec<WatchError>,
}

/// Lists the immediate children of a directory
#[derive(Debug, Clone, Default)]
pub struct DirectoryLister {
    filter: IgnoreFilter,
}

impl DirectoryLister {
    /// Create a lister with the given ignore filter
    pub fn new(filter: IgnoreFilter) -> Self {
        Self { filter }
    }

    /// The ignore filter in use
    pub fn filter(&self) -> &IgnoreFilter {
        &self.filter
    }

    /// List the children of `dir`
    pub fn list(&self, dir: &Path) -> Result<Listing> {
        self.list_relative_to(dir, dir)
    }

    /// List the children of `dir`, matching ignore patterns relative to `root`
    ///
    /// Fails only when `dir` itself cannot be read. Entries are sorted by
    /// file name.
    pub fn list_relative_to(&self, dir: &Path, root: &Path) -> Result<Listing> {
        let mut listing = Listing::default();

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                    let at_root = e.depth() == 0;
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));

                    if at_root {
                        return Err(match source.kind() {
                            io::ErrorKind::NotFound => WatchError::path_resolution(path, source),
                            _ => WatchError::stat(path, source),
                        });
                    }
                    listing.failures.push(WatchError::stat(path, source));
                    continue;
                }
            };

            let relative = entry.path().strip_prefix(root).unwrap_or_else(|_| entry.path());
            if self.filter.is_ignored(relative, entry.file_type().is_dir()) {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => listing.entries.push(ListedEntry {
                    name: entry.file_name().to_os_string(),
                    path: entry.path().to_path_buf(),
                    metadata: MetadataRecord::from_metadata(&metadata),
                }),
                Err(e) => {
                    let path = entry.path().to_path_buf();
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "metadata unavailable"));
                    listing.failures.push(WatchError::stat(path, source));
                }
            }
        }

        Ok(listing)
    }
}
