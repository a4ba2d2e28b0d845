//! Mark-and-sweep snapshot diffing for polled roots
//!
//! Each sweep bumps the root's generation counter, stamps every entry it
//! sees with that generation, and purges entries left with an older stamp.
//! Removals are detected without any delete notification, at the cost of
//! O(tree size) work per sweep.

use ahash::AHashMap;
use dirwatch_core::{paths, ChangeEvent, DirectoryLister, MetadataRecord, SizeDelta, WatchError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Last observed state of one entry under a polled root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Metadata as of the last sweep that saw the entry
    pub metadata: MetadataRecord,
    /// Generation of the last sweep that saw the entry
    pub last_seen_generation: u64,
}

/// Snapshot of a single root
#[derive(Debug, Default)]
struct RootSnapshot {
    current_generation: u64,
    entries: AHashMap<PathBuf, SnapshotEntry>,
}

impl RootSnapshot {
    /// Stamp `prefix` and everything under it as seen, keeping prior metadata
    ///
    /// Used when a directory or entry could not be read this sweep so its
    /// subtree is not mistaken for removed.
    fn keep_subtree(&mut self, prefix: &Path) {
        let generation = self.current_generation;
        for (path, entry) in self.entries.iter_mut() {
            if paths::is_within(path, prefix) {
                entry.last_seen_generation = generation;
            }
        }
    }
}

/// Result of one sweep
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Changes detected, in traversal order followed by removals
    pub events: Vec<ChangeEvent>,
    /// Entries that could not be read; retried on the next sweep
    pub skipped: Vec<WatchError>,
}

impl SweepOutcome {
    /// True when nothing changed and nothing failed
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.skipped.is_empty()
    }
}

/// Per-root snapshots of entry metadata
pub struct SnapshotStore {
    lister: DirectoryLister,
    roots: AHashMap<PathBuf, RootSnapshot>,
}

impl SnapshotStore {
    /// Create an empty store using `lister` for traversal
    pub fn new(lister: DirectoryLister) -> Self {
        Self {
            lister,
            roots: AHashMap::new(),
        }
    }

    /// Register a root and record its current state as the baseline
    ///
    /// No events are produced for the initial contents. Returns the number of
    /// entries recorded. Registering an already-registered root re-primes it.
    pub fn register(&mut self, root: &Path) -> Result<usize, WatchError> {
        MetadataRecord::lstat(root).map_err(|e| WatchError::path_resolution(root, e))?;

        self.roots.insert(root.to_path_buf(), RootSnapshot::default());
        let outcome = self.sweep(root);
        for err in &outcome.skipped {
            warn!("Baseline sweep of {} skipped entry: {}", root.display(), err);
        }

        let count = self.len(root);
        debug!("Registered polling root {} ({} entries)", root.display(), count);
        Ok(count)
    }

    /// Forget a root and all of its entries
    pub fn unregister(&mut self, root: &Path) -> bool {
        let removed = self.roots.remove(root).is_some();
        if removed {
            debug!("Unregistered polling root {}", root.display());
        }
        removed
    }

    /// Whether `root` is registered
    pub fn is_registered(&self, root: &Path) -> bool {
        self.roots.contains_key(root)
    }

    /// Registered roots
    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.keys().map(PathBuf::as_path)
    }

    /// Current generation of `root`, if registered
    pub fn generation(&self, root: &Path) -> Option<u64> {
        self.roots.get(root).map(|s| s.current_generation)
    }

    /// Look up one entry under `root`
    pub fn entry(&self, root: &Path, path: &Path) -> Option<&SnapshotEntry> {
        self.roots.get(root).and_then(|s| s.entries.get(path))
    }

    /// All entries under `root`
    pub fn entries<'a>(&'a self, root: &Path) -> impl Iterator<Item = (&'a Path, &'a SnapshotEntry)> {
        self.roots
            .get(root)
            .into_iter()
            .flat_map(|s| s.entries.iter().map(|(p, e)| (p.as_path(), e)))
    }

    /// Number of entries recorded under `root`
    pub fn len(&self, root: &Path) -> usize {
        self.roots.get(root).map_or(0, |s| s.entries.len())
    }

    /// Traverse `root` recursively and diff against the previous snapshot
    ///
    /// An unregistered root starts from an empty snapshot, so every entry is
    /// reported as added. If the root itself has disappeared, every recorded
    /// entry is reported as removed and the failure is returned in `skipped`.
    pub fn sweep(&mut self, root: &Path) -> SweepOutcome {
        let Self { lister, roots } = self;
        let snapshot = roots.entry(root.to_path_buf()).or_default();

        snapshot.current_generation += 1;
        let generation = snapshot.current_generation;

        let mut outcome = SweepOutcome::default();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let listing = match lister.list_relative_to(&dir, root) {
                Ok(listing) => listing,
                Err(err) => {
                    let root_gone = dir == root && matches!(err, WatchError::PathResolution { .. });
                    if !root_gone {
                        snapshot.keep_subtree(&dir);
                    }
                    outcome.skipped.push(err);
                    continue;
                }
            };

            for failure in listing.failures {
                if let Some(path) = failure.path() {
                    snapshot.keep_subtree(path);
                }
                outcome.skipped.push(failure);
            }

            for entry in listing.entries {
                let current = entry.metadata;
                match snapshot.entries.get_mut(&entry.path) {
                    None => {
                        outcome.events.push(ChangeEvent::Added(entry.path.clone()));
                        snapshot.entries.insert(
                            entry.path.clone(),
                            SnapshotEntry {
                                metadata: current,
                                last_seen_generation: generation,
                            },
                        );
                    }
                    Some(existing) => {
                        if current.has_zero_mtime() || existing.metadata.has_zero_mtime() {
                            warn!(
                                "Ambiguous zero timestamp for {} ({:?} vs {:?})",
                                entry.path.display(),
                                current.modified,
                                existing.metadata.modified
                            );
                        }
                        if current.is_modified_since(&existing.metadata) {
                            let delta = SizeDelta::between(&existing.metadata, &current);
                            outcome.events.push(ChangeEvent::Modified(entry.path.clone(), delta));
                        }
                        existing.metadata = current;
                        existing.last_seen_generation = generation;
                    }
                }

                // Hidden directories are recorded but not descended into
                let hidden = entry.name.to_string_lossy().starts_with('.');
                if current.is_dir() && !hidden {
                    pending.push(entry.path);
                }
            }
        }

        let mut removed: Vec<PathBuf> = snapshot
            .entries
            .iter()
            .filter(|(_, e)| e.last_seen_generation != generation)
            .map(|(p, _)| p.clone())
            .collect();
        removed.sort();

        for path in removed {
            snapshot.entries.remove(&path);
            outcome.events.push(ChangeEvent::Removed(path));
        }

        if !outcome.events.is_empty() {
            debug!(
                "Sweep {} of {}: {} change(s)",
                generation,
                root.display(),
                outcome.events.len()
            );
        }
        outcome
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DirectoryLister::default())
    }
}
