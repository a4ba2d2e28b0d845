//! Stream pool with periodic consolidation
//!
//! Every newly watched path gets its own single-path stream. Removing a path
//! only marks it dead in the stream that holds it, because an OS stream's
//! path set cannot shrink. Once dead paths or stream count pass their limits,
//! all live paths are rebuilt into a single stream and the old ones released.

use crate::config::ConsolidationLimits;
use crate::stream::{StreamBackend, StreamMessage, StreamSink, StreamToken, WatchStream};
use ahash::AHashMap;
use crossbeam_channel::Sender;
use dirwatch_core::WatchError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Streams holding an OS resource
    pub live_streams: usize,
    /// Paths still watched by the OS but no longer wanted
    pub dead_path_count: u64,
    /// Distinct paths still wanted
    pub watched_paths: usize,
    /// Successful consolidations since creation
    pub consolidations: u64,
}

/// Owns every watch stream
pub struct StreamPool {
    backend: Arc<dyn StreamBackend>,
    tx: Sender<StreamMessage>,
    limits: ConsolidationLimits,
    streams: Vec<WatchStream>,
    /// Active paths of streams replaced by a consolidation, kept until their
    /// queued messages have been drained
    retired: AHashMap<StreamToken, Vec<PathBuf>>,
    dead_path_count: u64,
    next_token: u64,
    consolidations: u64,
}

impl StreamPool {
    /// Create an empty pool; streams deliver their events into `tx`
    pub fn new(
        backend: Arc<dyn StreamBackend>,
        tx: Sender<StreamMessage>,
        limits: ConsolidationLimits,
    ) -> Self {
        Self {
            backend,
            tx,
            limits,
            streams: Vec::new(),
            retired: AHashMap::new(),
            dead_path_count: 0,
            next_token: 0,
            consolidations: 0,
        }
    }

    fn open(&mut self, paths: Vec<PathBuf>) -> Result<WatchStream, WatchError> {
        self.next_token += 1;
        let sink = StreamSink::new(StreamToken(self.next_token), self.tx.clone());
        WatchStream::open(self.backend.as_ref(), paths, sink)
    }

    /// Start watching `path` with a new single-path stream
    ///
    /// On failure the pool is unchanged.
    pub fn add_path(&mut self, path: &Path) -> Result<StreamToken, WatchError> {
        let stream = self.open(vec![path.to_path_buf()])?;
        let token = stream.token();
        self.streams.push(stream);
        debug!("Watching {} via {} ({} streams)", path.display(), token, self.streams.len());
        Ok(token)
    }

    /// Mark `path` dead in every stream holding it, then retire empty streams
    ///
    /// Returns whether any stream held the path.
    pub fn remove_path(&mut self, path: &Path) -> bool {
        let mut found = false;
        for stream in &mut self.streams {
            found |= stream.deactivate(path);
        }
        self.recompute_dead_paths();
        self.cleanup_empty_streams();
        found
    }

    /// Release and drop streams with no active paths
    ///
    /// Returns the number of streams retired.
    pub fn cleanup_empty_streams(&mut self) -> usize {
        let before = self.streams.len();
        self.streams.retain(|stream| !stream.is_empty());
        let retired = before - self.streams.len();
        if retired > 0 {
            self.recompute_dead_paths();
            debug!("Retired {} empty stream(s)", retired);
        }
        retired
    }

    fn recompute_dead_paths(&mut self) {
        self.dead_path_count = self.streams.iter().map(WatchStream::dead_paths).sum();
    }

    /// Whether the limits call for a consolidation
    pub fn needs_consolidation(&self) -> bool {
        self.dead_path_count > self.limits.max_dead_paths
            || self.streams.len() > self.limits.max_streams
    }

    /// Consolidate if the limits call for it
    ///
    /// Returns whether a consolidation took place.
    pub fn maybe_consolidate(&mut self) -> Result<bool, WatchError> {
        if !self.needs_consolidation() {
            return Ok(false);
        }
        self.consolidate()?;
        Ok(true)
    }

    /// Rebuild every live path into a single stream
    ///
    /// The replacement is created before anything is released: if creation
    /// fails, the existing streams stay in place and keep delivering.
    pub fn consolidate(&mut self) -> Result<(), WatchError> {
        let union: BTreeSet<PathBuf> = self
            .streams
            .iter()
            .flat_map(|s| s.active_paths().map(Path::to_path_buf))
            .collect();

        if union.is_empty() {
            let retired = self.streams.len();
            self.streams.clear();
            self.dead_path_count = 0;
            debug!("Consolidation retired {} stream(s) with no live paths", retired);
            return Ok(());
        }

        let path_count = union.len();
        let replacement = match self.open(union.into_iter().collect()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Consolidation failed, keeping {} stream(s): {}", self.streams.len(), e);
                return Err(e);
            }
        };

        let previous = std::mem::replace(&mut self.streams, vec![replacement]);
        let retired = previous.len();
        for stream in previous {
            let paths: Vec<PathBuf> = stream.active_paths().map(Path::to_path_buf).collect();
            if !paths.is_empty() {
                self.retired.insert(stream.token(), paths);
            }
        }

        self.dead_path_count = 0;
        self.consolidations += 1;
        info!("Consolidated {} stream(s) into one covering {} path(s)", retired, path_count);
        Ok(())
    }

    /// Whether events from `token` about `path` should be delivered
    ///
    /// False for paths that are dead in the stream. A stream replaced by a
    /// consolidation still covers the paths it held, as long as they are
    /// watched by the pool and [`StreamPool::forget_retired`] has not run.
    pub fn covers(&self, token: StreamToken, path: &Path) -> bool {
        if let Some(stream) = self.streams.iter().find(|s| s.token() == token) {
            return stream.is_active(path);
        }
        match self.retired.get(&token) {
            Some(paths) => paths.iter().any(|p| p == path) && self.is_watched(path),
            None => false,
        }
    }

    /// Whether `token` belongs to a stream still in the pool
    pub fn is_live(&self, token: StreamToken) -> bool {
        self.streams.iter().any(|s| s.token() == token)
    }

    /// Whether messages from `token` can still be delivered
    pub fn is_known(&self, token: StreamToken) -> bool {
        self.is_live(token) || self.retired.contains_key(&token)
    }

    fn is_watched(&self, path: &Path) -> bool {
        self.streams.iter().any(|s| s.is_active(path))
    }

    /// Paths still watched through the stream identified by `token`
    pub fn active_paths_of(&self, token: StreamToken) -> Vec<PathBuf> {
        if let Some(stream) = self.streams.iter().find(|s| s.token() == token) {
            return stream.active_paths().map(Path::to_path_buf).collect();
        }
        self.retired
            .get(&token)
            .map(|paths| paths.iter().filter(|p| self.is_watched(p)).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the path sets of replaced streams
    ///
    /// Call once every message queued before the last consolidation has been
    /// handled; later messages from those streams are ignored.
    pub fn forget_retired(&mut self) {
        if !self.retired.is_empty() {
            debug!("Forgetting {} retired stream(s)", self.retired.len());
            self.retired.clear();
        }
    }

    /// Union of every live path
    pub fn watched_paths(&self) -> BTreeSet<PathBuf> {
        self.streams
            .iter()
            .flat_map(|s| s.active_paths().map(Path::to_path_buf))
            .collect()
    }

    pub fn dead_path_count(&self) -> u64 {
        self.dead_path_count
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live_streams: self.streams.iter().filter(|s| s.is_live()).count(),
            dead_path_count: self.dead_path_count,
            watched_paths: self.watched_paths().len(),
            consolidations: self.consolidations,
        }
    }

    /// Release every stream
    pub fn clear(&mut self) {
        self.streams.clear();
        self.retired.clear();
        self.dead_path_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryBackend;
    use crossbeam_channel::{unbounded, Receiver};

    fn pool(backend: &MemoryBackend) -> (StreamPool, Receiver<StreamMessage>) {
        let (tx, rx) = unbounded();
        let pool = StreamPool::new(Arc::new(backend.clone()), tx, ConsolidationLimits::default());
        (pool, rx)
    }

    fn p(name: &str) -> PathBuf {
        PathBuf::from("/w").join(name)
    }

    #[test]
    fn test_add_path_opens_single_path_stream() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        let token = pool.add_path(&p("a")).unwrap();
        assert!(pool.covers(token, &p("a")));
        assert_eq!(backend.live_streams(), vec![vec![p("a")]]);
    }

    #[test]
    fn test_remove_only_path_retires_stream() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        let token = pool.add_path(&p("a")).unwrap();
        assert!(pool.remove_path(&p("a")));

        assert_eq!(pool.stream_count(), 0);
        assert_eq!(pool.dead_path_count(), 0);
        assert!(!pool.is_live(token));
        assert_eq!(backend.released(), 1);
    }

    #[test]
    fn test_stream_count_triggers_consolidation() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        for name in ["a", "b", "c"] {
            pool.add_path(&p(name)).unwrap();
            assert!(!pool.maybe_consolidate().unwrap());
        }
        pool.add_path(&p("d")).unwrap();
        assert!(pool.maybe_consolidate().unwrap());

        assert_eq!(pool.stream_count(), 1);
        assert_eq!(backend.live_streams(), vec![vec![p("a"), p("b"), p("c"), p("d")]]);
        assert_eq!(backend.released(), 4);
        assert_eq!(pool.stats().consolidations, 1);
    }

    #[test]
    fn test_dead_paths_trigger_consolidation() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        let names = ["a", "b", "c", "d", "e", "f", "g"];
        for name in names {
            pool.add_path(&p(name)).unwrap();
            pool.maybe_consolidate().unwrap();
        }
        // Merged at the fourth and seventh add
        assert_eq!(pool.stream_count(), 1);
        assert_eq!(pool.watched_paths().len(), names.len());

        for name in ["a", "b", "c", "d"] {
            pool.remove_path(&p(name));
            assert!(!pool.maybe_consolidate().unwrap());
        }
        assert_eq!(pool.dead_path_count(), 4);

        pool.remove_path(&p("e"));
        assert_eq!(pool.dead_path_count(), 5);
        assert!(pool.maybe_consolidate().unwrap());

        assert_eq!(pool.dead_path_count(), 0);
        assert_eq!(pool.watched_paths(), [p("f"), p("g")].into_iter().collect());
        assert_eq!(backend.live_streams(), vec![vec![p("f"), p("g")]]);
    }

    #[test]
    fn test_failed_consolidation_leaves_pool_untouched() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        let tokens: Vec<StreamToken> = ["a", "b", "c", "d"]
            .iter()
            .map(|name| pool.add_path(&p(name)).unwrap())
            .collect();

        backend.fail_next(1);
        assert!(pool.maybe_consolidate().is_err());

        assert_eq!(pool.stream_count(), 4);
        assert_eq!(backend.released(), 0);
        for (token, name) in tokens.iter().zip(["a", "b", "c", "d"]) {
            assert!(pool.covers(*token, &p(name)));
        }

        // Retried on the next trigger
        assert!(pool.maybe_consolidate().unwrap());
        assert_eq!(pool.stream_count(), 1);
    }

    #[test]
    fn test_dead_paths_are_not_covered() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        for name in ["a", "b", "c", "d"] {
            pool.add_path(&p(name)).unwrap();
        }
        pool.consolidate().unwrap();
        let token = backend_token(&pool);

        pool.remove_path(&p("b"));
        assert!(pool.covers(token, &p("a")));
        assert!(!pool.covers(token, &p("b")));
        assert_eq!(pool.dead_path_count(), 1);
    }

    #[test]
    fn test_consolidate_with_no_live_paths_retires_everything() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        pool.add_path(&p("a")).unwrap();
        pool.consolidate().unwrap();
        assert_eq!(backend.created(), 2);

        // Deactivate without cleanup to leave an empty stream behind
        for stream in &mut pool.streams {
            stream.deactivate(&p("a"));
        }
        pool.consolidate().unwrap();

        assert_eq!(pool.stream_count(), 0);
        assert!(backend.live_streams().is_empty());
        assert_eq!(backend.created(), 2);
    }

    #[test]
    fn test_failed_add_leaves_pool_untouched() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        backend.fail_next(1);
        assert!(pool.add_path(&p("a")).is_err());
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_replaced_stream_covers_until_forgotten() {
        let backend = MemoryBackend::new();
        let (mut pool, _rx) = pool(&backend);

        let a = pool.add_path(&p("a")).unwrap();
        let b = pool.add_path(&p("b")).unwrap();
        pool.consolidate().unwrap();

        assert!(!pool.is_live(a));
        assert!(pool.is_known(a));
        assert!(pool.covers(a, &p("a")));
        assert!(!pool.covers(a, &p("b")));
        assert_eq!(pool.active_paths_of(b), vec![p("b")]);

        // No longer watched at all
        pool.remove_path(&p("b"));
        assert!(!pool.covers(b, &p("b")));
        assert!(pool.active_paths_of(b).is_empty());

        pool.forget_retired();
        assert!(!pool.is_known(a));
        assert!(!pool.covers(a, &p("a")));
    }

    fn backend_token(pool: &StreamPool) -> StreamToken {
        pool.streams[0].token()
    }
}
