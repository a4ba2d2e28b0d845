//! Watch streams: one OS notification resource over a fixed set of paths
//!
//! A stream's path set is fixed at creation. Paths can only be marked
//! inactive afterwards; shrinking the OS-side set requires building a new
//! stream (see the pool's consolidation).

use ahash::AHashSet;
use crossbeam_channel::Sender;
use dirwatch_core::WatchError;
use notify::{RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Identifies the stream a native event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamToken(pub(crate) u64);

impl fmt::Display for StreamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Raw notification from a stream, tagged with its token
#[derive(Debug)]
pub struct StreamMessage {
    pub token: StreamToken,
    pub event: notify::Result<notify::Event>,
}

/// Delivery channel handed to a backend when a stream is created
#[derive(Debug, Clone)]
pub struct StreamSink {
    token: StreamToken,
    tx: Sender<StreamMessage>,
}

impl StreamSink {
    pub(crate) fn new(token: StreamToken, tx: Sender<StreamMessage>) -> Self {
        Self { token, tx }
    }

    /// Token of the stream this sink belongs to
    pub fn token(&self) -> StreamToken {
        self.token
    }

    /// Forward one notification to the dispatch thread
    ///
    /// Returns false once the dispatch side has shut down.
    pub fn deliver(&self, event: notify::Result<notify::Event>) -> bool {
        self.tx
            .send(StreamMessage {
                token: self.token,
                event,
            })
            .is_ok()
    }
}

/// Live OS resource; dropping it stops notifications and frees the resource
pub trait RawWatch: Send {}

impl RawWatch for notify::RecommendedWatcher {}

/// Creates OS watch resources
///
/// Creation is all-or-nothing: on error no resource is left behind.
pub trait StreamBackend: Send + Sync {
    /// Watch every path in `paths` (non-recursively), delivering into `sink`
    fn create(&self, paths: &[PathBuf], sink: StreamSink) -> notify::Result<Box<dyn RawWatch>>;
}

/// Backend using the platform's recommended notify watcher
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyBackend;

impl StreamBackend for NotifyBackend {
    fn create(&self, paths: &[PathBuf], sink: StreamSink) -> notify::Result<Box<dyn RawWatch>> {
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            sink.deliver(event);
        })?;

        for path in paths {
            // On failure `watcher` is dropped here, releasing what was registered
            watcher.watch(path, RecursiveMode::NonRecursive)?;
        }

        Ok(Box::new(watcher))
    }
}

/// In-process backend with no OS resources
///
/// Streams are recorded so their lifecycle can be inspected, and events can
/// be injected with [`MemoryBackend::emit`]. Useful for exercising the
/// engine deterministically.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    live: BTreeMap<StreamToken, (Vec<PathBuf>, StreamSink)>,
    created: usize,
    released: usize,
    failures_pending: usize,
}

struct MemoryWatch {
    token: StreamToken,
    state: Arc<Mutex<MemoryState>>,
}

impl RawWatch for MemoryWatch {}

impl Drop for MemoryWatch {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.live.remove(&self.token).is_some() {
            state.released += 1;
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` creations fail as if the OS refused
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures_pending = count;
    }

    /// Streams created so far
    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    /// Streams released so far
    pub fn released(&self) -> usize {
        self.state.lock().released
    }

    /// Path sets of the streams currently alive, in creation order
    pub fn live_streams(&self) -> Vec<Vec<PathBuf>> {
        self.state.lock().live.values().map(|(paths, _)| paths.clone()).collect()
    }

    /// Deliver `event` to every live stream watching the event path or its parent
    ///
    /// Returns the number of streams that received it.
    pub fn emit(&self, event: notify::Event) -> usize {
        let sinks: Vec<StreamSink> = {
            let state = self.state.lock();
            state
                .live
                .values()
                .filter(|(paths, _)| {
                    event.paths.iter().any(|p| {
                        paths.iter().any(|w| p == w || p.parent() == Some(w.as_path()))
                    })
                })
                .map(|(_, sink)| sink.clone())
                .collect()
        };

        sinks
            .iter()
            .filter(|sink| sink.deliver(Ok(event.clone())))
            .count()
    }
}

impl StreamBackend for MemoryBackend {
    fn create(&self, paths: &[PathBuf], sink: StreamSink) -> notify::Result<Box<dyn RawWatch>> {
        let mut state = self.state.lock();
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(notify::Error::generic("simulated resource exhaustion"));
        }

        let token = sink.token();
        state.live.insert(token, (paths.to_vec(), sink));
        state.created += 1;

        Ok(Box::new(MemoryWatch {
            token,
            state: Arc::clone(&self.state),
        }))
    }
}

/// One OS watch resource plus the bookkeeping of which paths are still wanted
///
/// Releasing is idempotent; a released stream is inert and dropping it is a
/// no-op.
pub struct WatchStream {
    token: StreamToken,
    raw: Option<Box<dyn RawWatch>>,
    paths: Vec<PathBuf>,
    active: AHashSet<PathBuf>,
}

impl WatchStream {
    /// Create a stream over `paths`
    pub fn open(
        backend: &dyn StreamBackend,
        paths: Vec<PathBuf>,
        sink: StreamSink,
    ) -> Result<Self, WatchError> {
        let token = sink.token();
        let raw = backend
            .create(&paths, sink)
            .map_err(|source| WatchError::OsResource {
                paths: paths.clone(),
                source,
            })?;

        debug!("Opened {} over {} path(s)", token, paths.len());
        let active = paths.iter().cloned().collect();
        Ok(Self {
            token,
            raw: Some(raw),
            paths,
            active,
        })
    }

    pub fn token(&self) -> StreamToken {
        self.token
    }

    /// Paths the OS resource was created with
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Whether `path` is still wanted by this stream
    pub fn is_active(&self, path: &Path) -> bool {
        self.active.contains(path)
    }

    /// Paths still wanted
    pub fn active_paths(&self) -> impl Iterator<Item = &Path> {
        self.active.iter().map(PathBuf::as_path)
    }

    /// Mark `path` as no longer wanted; returns whether it was active
    pub fn deactivate(&mut self, path: &Path) -> bool {
        self.active.remove(path)
    }

    /// True once every path has been deactivated
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Paths still watched by the OS but no longer wanted
    pub fn dead_paths(&self) -> u64 {
        (self.paths.len() - self.active.len()) as u64
    }

    /// Whether the OS resource is still held
    pub fn is_live(&self) -> bool {
        self.raw.is_some()
    }

    /// Stop notifications and free the OS resource
    pub fn release(&mut self) {
        if let Some(raw) = self.raw.take() {
            drop(raw);
            trace!("Released {}", self.token);
        }
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("token", &self.token)
            .field("live", &self.is_live())
            .field("paths", &self.paths)
            .field("active", &self.active.len())
            .finish()
    }
}
