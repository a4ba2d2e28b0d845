//! One-shot sweep of a directory

use anyhow::{Context, Result};
use dirwatch_core::{paths, DirectoryLister, EntryKind, IgnoreFilter};
use owo_colors::OwoColorize;
use std::path::Path;
use watcher::{SnapshotStore, WatcherConfig};

pub fn run(config: &WatcherConfig, root: &Path) -> Result<()> {
    let root = paths::canonicalize(root).context("Cannot snapshot directory")?;

    let mut store = SnapshotStore::new(DirectoryLister::new(IgnoreFilter::new(&config.ignore)));
    let outcome = store.sweep(&root);

    let mut entries: Vec<_> = store.entries(&root).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    println!("{} {}", "Snapshot of".bold(), root.display().to_string().cyan());
    for &(path, entry) in &entries {
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let marker = match entry.metadata.kind {
            EntryKind::Dir => "d",
            EntryKind::File => "f",
            EntryKind::Symlink => "l",
            EntryKind::Other => "?",
        };
        println!(
            "  {} {:>10}  {}",
            marker.dimmed(),
            entry.metadata.size,
            relative.display()
        );
    }

    println!();
    println!("{} entries", entries.len());
    for err in &outcome.skipped {
        eprintln!("{} {}", "skipped:".yellow(), err);
    }

    Ok(())
}
