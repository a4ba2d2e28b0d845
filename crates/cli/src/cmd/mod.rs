//! CLI command implementations

pub mod config;
pub mod snapshot;
pub mod watch;
