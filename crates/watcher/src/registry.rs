//! Subscriptions and their lazy garbage collection
//!
//! Detaching a subscription is a single atomic store. Records are only
//! unlinked later, by whichever dispatch pass next walks the path's list, so
//! a callback in flight may still run once after `detach` returns.

use ahash::AHashMap;
use dirwatch_core::{ChangeEvent, WatchError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Callback receiving change events
pub type ChangeCallback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Callback receiving errors about a subscription
pub type ErrorCallback = Box<dyn Fn(&WatchError) + Send + Sync>;

/// One caller's interest in one canonical path
pub struct Subscription {
    path: PathBuf,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
    active: AtomicBool,
}

impl Subscription {
    pub fn new(path: PathBuf, on_change: ChangeCallback, on_error: ErrorCallback) -> Arc<Self> {
        Arc::new(Self {
            path,
            on_change,
            on_error,
            active: AtomicBool::new(true),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivery; returns whether the subscription was active
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    pub fn notify(&self, event: &ChangeEvent) {
        (self.on_change)(event);
    }

    pub fn report(&self, error: &WatchError) {
        (self.on_error)(error);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Caller-side token for a subscription
///
/// With autorelease enabled (the default for `subscribe`), dropping the
/// handle detaches the subscription. A handle returned from a failed
/// subscribe is inert.
pub struct SubscriptionHandle {
    subscription: Option<Arc<Subscription>>,
    autorelease: bool,
}

impl SubscriptionHandle {
    pub(crate) fn new(subscription: Arc<Subscription>, autorelease: bool) -> Self {
        Self {
            subscription: Some(subscription),
            autorelease,
        }
    }

    /// A handle bound to nothing
    pub fn inert() -> Self {
        Self {
            subscription: None,
            autorelease: false,
        }
    }

    /// Stop delivery to this subscription
    ///
    /// Never blocks. At most one already-dispatching callback may still run.
    pub fn detach(&self) {
        if let Some(subscription) = &self.subscription {
            if subscription.deactivate() {
                trace!("Detached subscription on {}", subscription.path().display());
            }
        }
    }

    /// Whether events are still being delivered
    pub fn is_active(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| s.is_active())
    }

    /// Canonical path subscribed to, if any
    pub fn path(&self) -> Option<&Path> {
        self.subscription.as_ref().map(|s| s.path())
    }

    pub fn autorelease(&self) -> bool {
        self.autorelease
    }

    /// Keep the subscription alive after the handle is dropped
    pub fn set_autorelease(&mut self, autorelease: bool) {
        self.autorelease = autorelease;
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.autorelease {
            self.detach();
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("path", &self.path())
            .field("active", &self.is_active())
            .field("autorelease", &self.autorelease)
            .finish()
    }
}

/// Result of walking one path's subscriber list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visit {
    /// Active subscriptions called
    pub delivered: usize,
    /// Inactive subscriptions unlinked
    pub collected: usize,
    /// The list emptied and the path was dropped from the registry
    pub emptied: bool,
}

/// Subscriptions indexed by canonical path
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    paths: AHashMap<PathBuf, Vec<Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription; returns true if its path was not tracked before
    pub fn insert(&mut self, subscription: Arc<Subscription>) -> bool {
        let list = self.paths.entry(subscription.path().to_path_buf()).or_default();
        let first = list.is_empty();
        list.push(subscription);
        first
    }

    /// Whether any record (active or not yet collected) exists for `path`
    pub fn contains_path(&self, path: &Path) -> bool {
        self.paths.contains_key(path)
    }

    /// Whether `path` has at least one active subscription
    pub fn has_active(&self, path: &Path) -> bool {
        self.paths
            .get(path)
            .is_some_and(|list| list.iter().any(|s| s.is_active()))
    }

    /// Tracked paths
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.keys().map(PathBuf::as_path)
    }

    /// Total records, including detached ones not yet collected
    pub fn len(&self) -> usize {
        self.paths.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Walk `path`'s list, calling `f` on active subscriptions and unlinking the rest
    ///
    /// The list is walked in reverse so removed slots can be filled by
    /// swapping in the last element, which has already been visited.
    fn visit(&mut self, path: &Path, mut f: impl FnMut(&Subscription)) -> Visit {
        let mut visit = Visit::default();
        let Some(list) = self.paths.get_mut(path) else {
            return visit;
        };

        let mut index = list.len();
        while index > 0 {
            index -= 1;
            if list[index].is_active() {
                f(&list[index]);
                visit.delivered += 1;
            } else {
                list.swap_remove(index);
                visit.collected += 1;
            }
        }

        if list.is_empty() {
            self.paths.remove(path);
            visit.emptied = true;
            trace!("No subscriptions left on {}", path.display());
        }
        visit
    }

    /// Deliver `event` to the active subscriptions on `path`
    pub fn dispatch(&mut self, path: &Path, event: &ChangeEvent) -> Visit {
        self.visit(path, |s| s.notify(event))
    }

    /// Deliver `error` to the active subscriptions on `path`
    pub fn report_error(&mut self, path: &Path, error: &WatchError) -> Visit {
        self.visit(path, |s| s.report(error))
    }

    /// Unlink inactive subscriptions on `path` without delivering anything
    pub fn collect(&mut self, path: &Path) -> Visit {
        self.visit(path, |_| {})
    }

    /// Unlink inactive subscriptions everywhere; returns the paths that emptied
    pub fn collect_all(&mut self) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = self.paths.keys().cloned().collect();
        paths
            .into_iter()
            .filter(|path| self.collect(path).emptied)
            .collect()
    }

    /// Detach and unlink every subscription on `path`; returns how many were active
    pub fn detach_all(&mut self, path: &Path) -> usize {
        self.paths
            .remove(path)
            .map_or(0, |list| list.iter().filter(|s| s.deactivate()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(path: &str, tag: &'static str, log: &Log) -> Arc<Subscription> {
        let changes = Arc::clone(log);
        let errors = Arc::clone(log);
        Subscription::new(
            PathBuf::from(path),
            Box::new(move |event| changes.lock().push(format!("{}:{}", tag, event))),
            Box::new(move |err| errors.lock().push(format!("{}:error:{}", tag, err))),
        )
    }

    fn added(path: &str) -> ChangeEvent {
        ChangeEvent::Added(PathBuf::from(path))
    }

    #[test]
    fn test_dispatch_reaches_only_active() {
        let log = Log::default();
        let mut registry = SubscriptionRegistry::new();

        let first = recording("/w", "first", &log);
        let second = recording("/w", "second", &log);
        assert!(registry.insert(Arc::clone(&first)));
        assert!(!registry.insert(Arc::clone(&second)));

        first.deactivate();
        let visit = registry.dispatch(Path::new("/w"), &added("/w/x"));

        assert_eq!(visit.delivered, 1);
        assert_eq!(visit.collected, 1);
        assert!(!visit.emptied);
        assert_eq!(*log.lock(), vec!["second:added /w/x".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_last_detach_empties_path() {
        let log = Log::default();
        let mut registry = SubscriptionRegistry::new();

        let only = recording("/w", "only", &log);
        registry.insert(Arc::clone(&only));
        only.deactivate();

        // Still tracked until a pass walks the list
        assert!(registry.contains_path(Path::new("/w")));
        assert!(!registry.has_active(Path::new("/w")));

        let visit = registry.dispatch(Path::new("/w"), &added("/w/x"));
        assert!(visit.emptied);
        assert!(!registry.contains_path(Path::new("/w")));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_reverse_walk_collects_interleaved_records() {
        let log = Log::default();
        let mut registry = SubscriptionRegistry::new();

        let subs: Vec<_> = ["s0", "s1", "s2", "s3", "s4"]
            .into_iter()
            .map(|tag| recording("/w", tag, &log))
            .collect();
        for sub in &subs {
            registry.insert(Arc::clone(sub));
        }
        subs[0].deactivate();
        subs[2].deactivate();
        subs[4].deactivate();

        let visit = registry.dispatch(Path::new("/w"), &added("/w/x"));
        assert_eq!(visit.delivered, 2);
        assert_eq!(visit.collected, 3);

        let mut seen = log.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["s1:added /w/x", "s3:added /w/x"]);
    }

    #[test]
    fn test_collect_all_reports_emptied_paths() {
        let log = Log::default();
        let mut registry = SubscriptionRegistry::new();

        let a = recording("/a", "a", &log);
        let b = recording("/b", "b", &log);
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));
        a.deactivate();

        assert_eq!(registry.collect_all(), vec![PathBuf::from("/a")]);
        assert!(registry.contains_path(Path::new("/b")));
    }

    #[test]
    fn test_detach_all() {
        let log = Log::default();
        let mut registry = SubscriptionRegistry::new();

        let subs: Vec<_> = (0..3).map(|_| recording("/w", "s", &log)).collect();
        for sub in &subs {
            registry.insert(Arc::clone(sub));
        }
        subs[1].deactivate();

        assert_eq!(registry.detach_all(Path::new("/w")), 2);
        assert!(registry.is_empty());
        assert!(subs.iter().all(|s| !s.is_active()));
    }

    #[test]
    fn test_report_error_reaches_active() {
        let log = Log::default();
        let mut registry = SubscriptionRegistry::new();
        registry.insert(recording("/w", "s", &log));

        let err = WatchError::stat("/w/x", io::Error::from(io::ErrorKind::PermissionDenied));
        registry.report_error(Path::new("/w"), &err);

        assert_eq!(log.lock().len(), 1);
        assert!(log.lock()[0].starts_with("s:error:"));
    }

    #[test]
    fn test_handle_autorelease() {
        let log = Log::default();
        let sub = recording("/w", "s", &log);

        let handle = SubscriptionHandle::new(Arc::clone(&sub), true);
        assert!(handle.is_active());
        assert_eq!(handle.path(), Some(Path::new("/w")));
        drop(handle);
        assert!(!sub.is_active());

        let sub = recording("/w", "s", &log);
        let handle = SubscriptionHandle::new(Arc::clone(&sub), false);
        drop(handle);
        assert!(sub.is_active());
    }

    #[test]
    fn test_handle_detach_is_idempotent() {
        let log = Log::default();
        let sub = recording("/w", "s", &log);
        let handle = SubscriptionHandle::new(Arc::clone(&sub), false);

        handle.detach();
        handle.detach();
        assert!(!handle.is_active());
        assert!(!sub.is_active());
    }

    #[test]
    fn test_inert_handle() {
        let handle = SubscriptionHandle::inert();
        assert!(!handle.is_active());
        assert!(handle.path().is_none());
        handle.detach();
    }
}
