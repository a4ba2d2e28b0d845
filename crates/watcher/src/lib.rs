//! Directory change notifications
//!
//! This crate provides:
//! - Subscriptions with callback delivery on a background thread
//! - Native OS notifications pooled into as few streams as possible
//! - Polling via mark-and-sweep snapshot diffs
//! - Lazy, lock-free detach of subscriptions

pub mod config;
pub mod facade;
pub mod pool;
pub mod registry;
pub mod snapshot;
pub mod stream;

pub use config::{ConsolidationLimits, WatchMode, WatcherConfig};
pub use facade::{WatcherFacade, WatcherStats};
pub use pool::{PoolStats, StreamPool};
pub use registry::{Subscription, SubscriptionHandle, SubscriptionRegistry};
pub use snapshot::{SnapshotEntry, SnapshotStore, SweepOutcome};
pub use stream::{MemoryBackend, NotifyBackend, StreamBackend, StreamToken, WatchStream};

pub use dirwatch_core::{ChangeEvent, SizeDelta, WatchError};
