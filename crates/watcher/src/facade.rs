//! Public entry point tying the registry, stream pool and snapshots together
//!
//! All state lives behind one lock, shared between caller threads and a
//! single background dispatch thread. Every callback runs on the dispatch
//! thread. Requests issued from inside a callback (subscribe, unsubscribe,
//! consolidate) are queued and applied once the current pass is done, so a
//! callback never re-enters the lock it is running under.

use crate::config::{WatchMode, WatcherConfig};
use crate::pool::{PoolStats, StreamPool};
use crate::registry::{Subscription, SubscriptionHandle, SubscriptionRegistry};
use crate::snapshot::SnapshotStore;
use crate::stream::{NotifyBackend, StreamBackend, StreamMessage, StreamToken};
use ahash::AHashMap;
use anyhow::{Context, Result};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use dirwatch_core::{paths, ChangeEvent, DirectoryLister, IgnoreFilter, SizeDelta, WatchError};
use notify::event::{EventKind, ModifyKind, RenameMode};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Point-in-time engine statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Subscription records, including detached ones not yet collected
    pub subscriptions: usize,
    /// Paths observed through native streams
    pub native_paths: usize,
    /// Paths observed through polling sweeps
    pub polling_roots: usize,
    pub pool: PoolStats,
}

enum Request {
    Subscribe {
        subscription: Arc<Subscription>,
        mode: WatchMode,
    },
    UnsubscribeAll(PathBuf),
    Sweep,
    Consolidate,
    Shutdown,
}

struct Engine {
    registry: SubscriptionRegistry,
    pool: StreamPool,
    snapshots: SnapshotStore,
    modes: AHashMap<PathBuf, WatchMode>,
    filter: IgnoreFilter,
}

impl Engine {
    /// Attach a subscription, creating coverage if its path is new
    ///
    /// A path already tracked keeps the mode it was first subscribed with.
    /// `Ok(Some(_))` means the subscription is in place but the consolidation
    /// it triggered failed.
    fn subscribe(
        &mut self,
        subscription: Arc<Subscription>,
        mode: WatchMode,
    ) -> Result<Option<WatchError>, WatchError> {
        let path = subscription.path().to_path_buf();
        if self.registry.contains_path(&path) {
            self.registry.insert(subscription);
            return Ok(None);
        }

        match mode {
            WatchMode::Native => {
                self.pool.add_path(&path)?;
            }
            WatchMode::Polling => {
                self.snapshots.register(&path)?;
            }
        }

        self.registry.insert(subscription);
        self.modes.insert(path.clone(), mode);
        info!("Watching {} ({:?})", path.display(), mode);

        Ok(self.rebalance().err())
    }

    fn unsubscribe_all(&mut self, path: &Path) -> usize {
        let detached = self.registry.detach_all(path);
        if self.release(path) {
            let _ = self.rebalance();
        }
        detached
    }

    /// Drop coverage for a path with no subscriptions left
    fn release(&mut self, path: &Path) -> bool {
        match self.modes.remove(path) {
            Some(WatchMode::Native) => {
                self.pool.remove_path(path);
                debug!("Stopped watching {}", path.display());
                true
            }
            Some(WatchMode::Polling) => {
                self.snapshots.unregister(path);
                debug!("Stopped polling {}", path.display());
                true
            }
            None => false,
        }
    }

    /// Release paths whose subscriptions have all been detached
    fn collect_detached(&mut self) {
        for path in self.registry.collect_all() {
            self.release(&path);
        }
    }

    /// Collect detached subscriptions, then consolidate if the pool limits call for it
    ///
    /// A failed consolidation keeps every existing stream and is retried on
    /// the next trigger.
    fn rebalance(&mut self) -> Result<(), WatchError> {
        self.collect_detached();
        self.pool.maybe_consolidate().map(|_| ()).map_err(|e| {
            warn!("Consolidation postponed: {}", e);
            e
        })
    }

    /// Rebuild every path that still has an active subscription into one stream
    fn consolidate(&mut self) -> Result<(), WatchError> {
        self.collect_detached();
        self.pool.consolidate()
    }

    fn handle_stream(&mut self, message: StreamMessage) {
        let StreamMessage { token, event } = message;
        if !self.pool.is_known(token) {
            trace!("Dropping event from retired {}", token);
            return;
        }

        let mut released = false;
        match event {
            Ok(event) => {
                for change in translate(event) {
                    released |= self.deliver_native(token, &change);
                }
            }
            Err(source) => {
                let paths = self.pool.active_paths_of(token);
                warn!("{} reported an error: {}", token, source);
                let error = WatchError::OsResource {
                    paths: paths.clone(),
                    source,
                };
                for path in &paths {
                    if self.registry.report_error(path, &error).emptied {
                        released |= self.release(path);
                    }
                }
            }
        }

        if released {
            let _ = self.rebalance();
        }
    }

    /// Route one native change to the watched path it belongs to
    ///
    /// A change is relevant to a watched directory when it is about the
    /// directory itself or one of its immediate children.
    fn deliver_native(&mut self, token: StreamToken, change: &ChangeEvent) -> bool {
        let path = change.path();
        if let Some(name) = path.file_name() {
            // Native events carry no metadata; only name patterns apply
            if self.filter.is_ignored(Path::new(name), false) {
                return false;
            }
        }

        let mut targets = Vec::with_capacity(2);
        if self.pool.covers(token, path) {
            targets.push(path.to_path_buf());
        }
        if let Some(parent) = path.parent() {
            if self.pool.covers(token, parent) {
                targets.push(parent.to_path_buf());
            }
        }

        let mut released = false;
        for target in targets {
            if self.registry.dispatch(&target, change).emptied {
                released |= self.release(&target);
            }
        }
        released
    }

    /// Sweep every polling root, then collect detached subscriptions everywhere and rebalance
    fn poll(&mut self) {
        let roots: Vec<PathBuf> = self
            .modes
            .iter()
            .filter(|(_, mode)| **mode == WatchMode::Polling)
            .map(|(path, _)| path.clone())
            .collect();

        for root in roots {
            self.sweep_root(&root);
        }

        let _ = self.rebalance();
    }

    fn sweep_root(&mut self, root: &Path) {
        if self.registry.collect(root).emptied {
            self.release(root);
            return;
        }

        let outcome = self.snapshots.sweep(root);
        for error in &outcome.skipped {
            debug!("Sweep of {} skipped: {}", root.display(), error);
            if self.registry.report_error(root, error).emptied {
                self.release(root);
                return;
            }
        }
        for event in &outcome.events {
            if self.registry.dispatch(root, event).emptied {
                self.release(root);
                return;
            }
        }
    }

    fn apply(&mut self, request: Request) {
        match request {
            Request::Subscribe { subscription, mode } => {
                match self.subscribe(Arc::clone(&subscription), mode) {
                    Ok(None) => {}
                    Ok(Some(e)) => subscription.report(&e),
                    Err(e) => {
                        warn!("Deferred subscribe to {} failed: {}", subscription.path().display(), e);
                        subscription.deactivate();
                        subscription.report(&e);
                    }
                }
            }
            Request::UnsubscribeAll(path) => {
                self.unsubscribe_all(&path);
            }
            Request::Sweep => self.poll(),
            Request::Consolidate => {
                if let Err(e) = self.consolidate() {
                    warn!("Requested consolidation failed: {}", e);
                }
            }
            Request::Shutdown => {}
        }
    }

    fn stats(&self) -> WatcherStats {
        let polling_roots = self
            .modes
            .values()
            .filter(|mode| **mode == WatchMode::Polling)
            .count();
        WatcherStats {
            subscriptions: self.registry.len(),
            native_paths: self.modes.len() - polling_roots,
            polling_roots,
            pool: self.pool.stats(),
        }
    }

    fn shutdown(&mut self) {
        self.pool.clear();
        self.modes.clear();
    }
}

/// Map a notify event onto change events
///
/// Renames become a removal of the old name and an addition of the new one.
/// Native notifications carry no metadata, so modifications have an unknown
/// size delta. Access events are dropped.
fn translate(event: notify::Event) -> Vec<ChangeEvent> {
    let notify::Event { kind, paths, .. } = event;
    match kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(ChangeEvent::Added).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(ChangeEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            let mut paths = paths.into_iter();
            let from = paths.next();
            let to = paths.next();
            from.map(ChangeEvent::Removed)
                .into_iter()
                .chain(to.map(ChangeEvent::Added))
                .collect()
        }
        _ => paths
            .into_iter()
            .map(|path| ChangeEvent::Modified(path, SizeDelta::Unknown))
            .collect(),
    }
}

fn run_dispatch(
    engine: Arc<Mutex<Engine>>,
    events: Receiver<StreamMessage>,
    requests: Receiver<Request>,
    poll_interval: Duration,
) {
    let ticker = tick(poll_interval);
    debug!("Dispatch thread started (poll every {:?})", poll_interval);

    loop {
        select! {
            recv(events) -> message => match message {
                Ok(message) => {
                    let mut guard = engine.lock();
                    guard.handle_stream(message);
                    // Replaced streams stop sending before the swap, so an empty
                    // queue means all of their messages were handled
                    if events.is_empty() {
                        guard.pool.forget_retired();
                    }
                }
                Err(_) => break,
            },
            recv(ticker) -> _ => engine.lock().poll(),
            recv(requests) -> request => match request {
                Ok(Request::Shutdown) | Err(_) => break,
                Ok(request) => engine.lock().apply(request),
            },
        }

        // Requests queued by callbacks during this pass
        while let Ok(request) = requests.try_recv() {
            if matches!(request, Request::Shutdown) {
                debug!("Dispatch thread stopping");
                return;
            }
            engine.lock().apply(request);
        }
    }

    debug!("Dispatch thread stopping");
}

/// Filesystem change notifications for any number of paths
///
/// Callbacks run on a background thread owned by the facade. From inside a
/// callback, `subscribe`, `unsubscribe_all`, `consolidate` and handle
/// operations are safe; they take effect after the current dispatch pass.
/// Calling `stats` from a callback would block on the engine lock.
pub struct WatcherFacade {
    engine: Arc<Mutex<Engine>>,
    requests: Sender<Request>,
    dispatch_thread: Option<JoinHandle<()>>,
    dispatch_thread_id: ThreadId,
    config: WatcherConfig,
}

impl WatcherFacade {
    /// Create a facade backed by the platform's native notifications
    pub fn new(config: WatcherConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(NotifyBackend))
    }

    /// Create a facade with a custom stream backend
    pub fn with_backend(config: WatcherConfig, backend: Arc<dyn StreamBackend>) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = unbounded();
        let (request_tx, request_rx) = unbounded();

        let filter = IgnoreFilter::new(&config.ignore);
        let engine = Arc::new(Mutex::new(Engine {
            registry: SubscriptionRegistry::new(),
            pool: StreamPool::new(backend, event_tx, config.consolidation),
            snapshots: SnapshotStore::new(DirectoryLister::new(filter.clone())),
            modes: AHashMap::new(),
            filter,
        }));

        let thread_engine = Arc::clone(&engine);
        let poll_interval = config.poll_interval();
        let dispatch_thread = thread::Builder::new()
            .name("dirwatch-dispatch".to_string())
            .spawn(move || run_dispatch(thread_engine, event_rx, request_rx, poll_interval))
            .context("Failed to spawn dispatch thread")?;
        let dispatch_thread_id = dispatch_thread.thread().id();

        info!("Watcher started (default mode {:?})", config.mode);
        Ok(Self {
            engine,
            requests: request_tx,
            dispatch_thread: Some(dispatch_thread),
            dispatch_thread_id,
            config,
        })
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Whether the current thread is the dispatch thread
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.dispatch_thread_id
    }

    /// Subscribe to changes under `path` using the configured default mode
    ///
    /// See [`WatcherFacade::subscribe_with_mode`].
    pub fn subscribe<C, E>(
        &self,
        path: impl AsRef<Path>,
        on_change: C,
        on_error: E,
        autorelease: bool,
    ) -> SubscriptionHandle
    where
        C: Fn(&ChangeEvent) + Send + Sync + 'static,
        E: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.subscribe_with_mode(path, self.config.mode, on_change, on_error, autorelease)
    }

    /// Subscribe to changes of `path` and its immediate children
    ///
    /// `path` is canonicalized first; if that fails, `on_error` receives a
    /// [`WatchError::PathResolution`] and the returned handle is inactive.
    /// If the OS refuses a new watch resource, `on_error` receives a
    /// [`WatchError::OsResource`] and existing watches are unaffected.
    ///
    /// A path that is already watched keeps its existing mode. With
    /// `autorelease`, dropping the handle detaches the subscription.
    pub fn subscribe_with_mode<C, E>(
        &self,
        path: impl AsRef<Path>,
        mode: WatchMode,
        on_change: C,
        on_error: E,
        autorelease: bool,
    ) -> SubscriptionHandle
    where
        C: Fn(&ChangeEvent) + Send + Sync + 'static,
        E: Fn(&WatchError) + Send + Sync + 'static,
    {
        let canonical = match paths::canonicalize(path.as_ref()) {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!("Cannot subscribe: {}", e);
                on_error(&e);
                return SubscriptionHandle::inert();
            }
        };

        let subscription = Subscription::new(canonical, Box::new(on_change), Box::new(on_error));
        let handle = SubscriptionHandle::new(Arc::clone(&subscription), autorelease);

        if self.is_dispatch_thread() {
            trace!("Deferring subscribe to {}", subscription.path().display());
            let _ = self.requests.send(Request::Subscribe { subscription, mode });
            return handle;
        }

        // Errors are reported once the lock is released
        let result = self.engine.lock().subscribe(Arc::clone(&subscription), mode);
        match result {
            Ok(None) => {}
            Ok(Some(e)) => subscription.report(&e),
            Err(e) => {
                warn!("Subscribe to {} failed: {}", subscription.path().display(), e);
                subscription.deactivate();
                subscription.report(&e);
            }
        }
        handle
    }

    /// Detach every subscription on `path` and stop watching it
    ///
    /// Returns the number of active subscriptions detached. When called from
    /// a callback the request is deferred and 0 is returned.
    pub fn unsubscribe_all(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        // The path may already be gone from disk
        let canonical = paths::canonicalize(path).unwrap_or_else(|_| paths::expand_home(path));

        if self.is_dispatch_thread() {
            let _ = self.requests.send(Request::UnsubscribeAll(canonical));
            return 0;
        }
        self.engine.lock().unsubscribe_all(&canonical)
    }

    /// Rebuild all native watches into a single stream now
    ///
    /// Paths whose subscriptions were all detached are released first. On
    /// failure the existing streams keep delivering. Deferred (and always
    /// `Ok`) when called from a callback.
    pub fn consolidate(&self) -> Result<(), WatchError> {
        if self.is_dispatch_thread() {
            let _ = self.requests.send(Request::Consolidate);
            return Ok(());
        }
        self.engine.lock().consolidate()
    }

    /// Ask the dispatch thread to sweep polling roots without waiting for the next tick
    pub fn request_sweep(&self) {
        let _ = self.requests.send(Request::Sweep);
    }

    pub fn stats(&self) -> WatcherStats {
        self.engine.lock().stats()
    }
}

impl Drop for WatcherFacade {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);

        if self.is_dispatch_thread() {
            // Dropped from inside a callback; the thread exits after this pass
            return;
        }

        if let Some(handle) = self.dispatch_thread.take() {
            if handle.join().is_err() {
                warn!("Dispatch thread panicked");
            }
        }
        self.engine.lock().shutdown();
        debug!("Watcher stopped");
    }
}
