//! End-to-end tests for the dirwatch binary

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn dirwatch(args: &[&str], home: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dirwatch"))
        .args(args)
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run dirwatch")
}

#[test]
fn test_snapshot_lists_entries() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("a.txt"), b"0123456789").unwrap();
    fs::create_dir(temp_dir.path().join("sub")).unwrap();
    fs::write(temp_dir.path().join("sub/b.txt"), b"x").unwrap();
    fs::create_dir(temp_dir.path().join(".git")).unwrap();

    let output = dirwatch(&["snapshot", temp_dir.path().to_str().unwrap()], temp_dir.path());
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("a.txt"));
    assert!(stdout.contains("b.txt"));
    assert!(!stdout.contains(".git"));
    assert!(stdout.contains("3 entries"));
}

#[test]
fn test_snapshot_missing_directory_fails() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing");

    let output = dirwatch(&["snapshot", missing.to_str().unwrap()], temp_dir.path());
    assert!(!output.status.success());
}

#[test]
fn test_config_reads_explicit_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("dirwatch.toml");
    fs::write(&config, "mode = \"polling\"\npoll_interval_ms = 250\n").unwrap();

    let output = dirwatch(&["--config", config.to_str().unwrap(), "config"], temp_dir.path());
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mode = \"polling\""));
    assert!(stdout.contains("poll_interval_ms = 250"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("dirwatch.toml");
    fs::write(&config, "poll_interval_ms = 0\n").unwrap();

    let output = dirwatch(&["--config", config.to_str().unwrap(), "config"], temp_dir.path());
    assert!(!output.status.success());
}

#[test]
fn test_watch_poll_reports_new_file() {
    let temp_dir = TempDir::new().unwrap();
    let watched = temp_dir.path().join("watched");
    fs::create_dir(&watched).unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_dirwatch"))
        .args(["watch", "--poll", "--interval", "50", "--count", "1"])
        .arg(&watched)
        .env("HOME", temp_dir.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let first = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(first.contains("Watching"));

    fs::write(watched.join("fresh.txt"), b"hello").unwrap();
    let change = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(change.contains("added"));
    assert!(change.contains("fresh.txt"));

    let status = child.wait().unwrap();
    assert!(status.success());
}

#[test]
fn test_watch_missing_directory_fails() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing");

    let output = dirwatch(&["watch", "--poll", missing.to_str().unwrap()], temp_dir.path());
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Nothing to watch"));
}
