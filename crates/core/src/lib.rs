//! Shared building blocks for the dirwatch engine
//!
//! This crate provides:
//! - Path canonicalization and home-directory expansion
//! - Immediate-children directory listing with a fixed ignore filter
//! - Per-entry metadata records (lstat)
//! - Change events and the error taxonomy

pub mod error;
pub mod event;
pub mod filter;
pub mod lister;
pub mod metadata;
pub mod paths;

// Re-exports
pub use error::{Result, WatchError};
pub use event::{ChangeEvent, SizeDelta};
pub use filter::{IgnoreConfig, IgnoreFilter};
pub use lister::{DirectoryLister, ListedEntry, Listing};
pub use metadata::{EntryKind, MetadataRecord};
