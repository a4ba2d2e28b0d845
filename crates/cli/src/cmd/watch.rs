//! Print changes as they are delivered

use anyhow::{bail, Result};
use crossbeam_channel::unbounded;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use watcher::{ChangeEvent, SubscriptionHandle, WatchMode, WatcherConfig, WatcherFacade};

enum Notice {
    Change(ChangeEvent),
    Error(String),
}

pub fn run(
    mut config: WatcherConfig,
    paths: &[PathBuf],
    poll: bool,
    interval: Option<u64>,
    count: Option<usize>,
) -> Result<()> {
    if poll {
        config.mode = WatchMode::Polling;
    }
    if let Some(ms) = interval {
        config.poll_interval_ms = ms;
    }

    let facade = WatcherFacade::new(config)?;
    let (tx, rx) = unbounded();

    let mut handles: Vec<SubscriptionHandle> = Vec::with_capacity(paths.len());
    for path in paths {
        let change_tx = tx.clone();
        let error_tx = tx.clone();
        let handle = facade.subscribe(
            path,
            move |event: &ChangeEvent| {
                let _ = change_tx.send(Notice::Change(event.clone()));
            },
            move |err| {
                let _ = error_tx.send(Notice::Error(err.to_string()));
            },
            true,
        );

        match handle.path() {
            Some(canonical) if handle.is_active() => {
                println!("{} {}", "Watching".bold(), canonical.display().to_string().cyan());
            }
            _ => eprintln!("{} {}", "Skipped".yellow(), path.display()),
        }
        handles.push(handle);
    }
    drop(tx);

    if !handles.iter().any(SubscriptionHandle::is_active) {
        // Errors from the failed subscribes are already queued
        for notice in rx.try_iter() {
            if let Notice::Error(message) = notice {
                eprintln!("  {}", message.red());
            }
        }
        bail!("Nothing to watch");
    }

    let mut seen = 0usize;
    for notice in rx.iter() {
        match notice {
            Notice::Change(event) => {
                print_change(&event);
                seen += 1;
                if count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            Notice::Error(message) => eprintln!("{} {}", "error:".red().bold(), message),
        }
    }

    Ok(())
}

fn print_change(event: &ChangeEvent) {
    let path = event.path().display().to_string();
    match event {
        ChangeEvent::Added(_) => println!("{} {}", "+ added   ".green(), path),
        ChangeEvent::Modified(_, delta) => {
            println!("{} {} {}", "~ modified".yellow(), path, format!("({})", delta).dimmed())
        }
        ChangeEvent::Removed(_) => println!("{} {}", "- removed ".red(), path),
    }
}
