use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use tellus_jobs::{AsyncReturn, CancelFlag, Job};

use crate::absent_resource_list::AbsentResourceList;
use crate::change::{ChangeListener, LayerChange};
use crate::decoder::{DecodeError, TextureDecoder};
use crate::file_store::FileStore;
use crate::retriever::{RetrieveError, Retriever};
use crate::services::LayerServices;
use crate::tile_key::TileKey;

/// Current wall-clock time as epoch milliseconds.
pub fn epoch_ms() -> u64 {
    instant::SystemTime::now()
        .duration_since(instant::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One pending tile request. Lower priority values are served first; the
/// selector uses squared eye distance, so nearer tiles win.
#[derive(Clone, Copy, Debug)]
pub struct RequestTask {
    pub key: TileKey,
    pub priority: f64,
    pub enqueued_at: instant::Instant,
}

impl PartialEq for RequestTask {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.priority.total_cmp(&other.priority) == Ordering::Equal
    }
}

impl Eq for RequestTask {}

impl Ord for RequestTask {
    // inverted so the max-heap pops the lowest priority value first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for RequestTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    heap: BinaryHeap<RequestTask>,
    queued: HashSet<TileKey>,
    in_flight: HashSet<TileKey>,
}

/// Per-layer request queue. Requests accumulate during tile selection, the
/// dispatch step drains the best ones up to the concurrency budget, and
/// whatever remains is discarded; a tile still worth loading will be
/// re-requested next frame with a fresh priority.
pub struct RetrievalQueue {
    inner: Mutex<QueueInner>,
}

impl Default for RetrievalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrievalQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                queued: HashSet::new(),
                in_flight: HashSet::new(),
            }),
        }
    }

    /// Adds a request unless the tile is already queued or being retrieved.
    /// Returns whether the request was accepted.
    pub fn enqueue(&self, key: TileKey, priority: f64) -> bool {
        let mut inner = self.lock();
        if inner.in_flight.contains(&key) || !inner.queued.insert(key) {
            return false;
        }
        inner.heap.push(RequestTask {
            key,
            priority,
            enqueued_at: instant::Instant::now(),
        });
        true
    }

    /// True while the tile is queued or in flight.
    pub fn is_pending(&self, key: TileKey) -> bool {
        let inner = self.lock();
        inner.queued.contains(&key) || inner.in_flight.contains(&key)
    }

    /// Takes up to `max` requests in priority order, marks them in flight and
    /// drops the rest of the queue.
    pub fn drain(&self, max: usize) -> Vec<RequestTask> {
        let mut inner = self.lock();
        let budget = max.saturating_sub(inner.in_flight.len());
        let mut taken = Vec::with_capacity(budget.min(inner.heap.len()));
        while taken.len() < budget {
            let Some(task) = inner.heap.pop() else {
                break;
            };
            inner.in_flight.insert(task.key);
            taken.push(task);
        }
        inner.heap.clear();
        inner.queued.clear();
        taken
    }

    /// Releases a tile's in-flight slot once its retrieval finished.
    pub fn complete(&self, key: TileKey) {
        self.lock().in_flight.remove(&key);
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.heap.clear();
        inner.queued.clear();
        inner.in_flight.clear();
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TileLoadError {
    #[error("network retrieval is disabled")]
    NetworkDisabled,
    #[error("host is marked unavailable")]
    HostUnavailable,
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What became of one retrieval.
#[derive(Debug)]
pub enum TileLoadStatus {
    Loaded { from_cache: bool },
    /// The job never ran its retrieval: the layer was disposed first.
    Cancelled,
    /// The request sat in the pipeline past the stale limit; the tile will
    /// be re-requested with a fresh priority if it is still needed.
    Stale,
    Failed(TileLoadError),
}

#[derive(Debug)]
pub struct TileLoadOutcome {
    pub layer: String,
    pub key: TileKey,
    pub status: TileLoadStatus,
}

/// Loads one tile's texture: first from the local file store, then over the
/// network, persisting and caching on success. Emits exactly one change
/// notification per completed attempt; cancelled jobs emit none.
pub struct RetrieveTileJob {
    pub layer: String,
    pub key: TileKey,
    pub cache_path: String,
    pub url: String,
    /// Cached files modified before this epoch-ms instant are stale; zero
    /// disables the check.
    pub expiry_time_ms: u64,
    pub enqueued_at: instant::Instant,
    /// Requests older than this when the job starts are skipped; zero
    /// disables the check.
    pub stale_limit: std::time::Duration,
    pub services: LayerServices,
    pub absent: Arc<AbsentResourceList>,
    pub cancel: CancelFlag,
}

impl RetrieveTileJob {
    fn load_local(&self) -> Option<Result<TileLoadStatus, TileLoadError>> {
        let path = self.services.file_store.find_local_file(&self.cache_path)?;

        if self.expiry_time_ms > 0 {
            let modified = self.services.file_store.modified_epoch_ms(&self.cache_path);
            if modified.map_or(true, |ms| ms < self.expiry_time_ms) {
                bevy::log::debug!("discarding expired tile file {}", self.cache_path);
                if let Err(err) = self.services.file_store.remove_file(&self.cache_path) {
                    bevy::log::warn!("failed to remove expired {}: {err}", self.cache_path);
                }
                return None;
            }
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => return Some(Err(err.into())),
        };
        match self.services.decoder.decode(bytes) {
            Ok(data) => {
                self.services
                    .cache
                    .put(self.key, Arc::new(data), epoch_ms());
                Some(Ok(TileLoadStatus::Loaded { from_cache: true }))
            }
            Err(err) => {
                // a corrupt cached file would fail forever; drop it and let
                // the network attempt run
                bevy::log::warn!("corrupt tile file {}: {err}", self.cache_path);
                if let Err(err) = self.services.file_store.remove_file(&self.cache_path) {
                    bevy::log::warn!("failed to remove corrupt {}: {err}", self.cache_path);
                }
                None
            }
        }
    }

    async fn load_remote(&self) -> Result<TileLoadStatus, TileLoadError> {
        if !self.services.network.is_network_enabled() {
            return Err(TileLoadError::NetworkDisabled);
        }
        if !self.services.network.is_host_available(&self.url) {
            return Err(TileLoadError::HostUnavailable);
        }

        let bytes = match self.services.retriever.retrieve(self.url.clone()).await {
            Ok(bytes) => {
                self.services.network.log_success(&self.url);
                bytes
            }
            Err(err) => {
                self.services.network.log_failure(&self.url);
                return Err(err.into());
            }
        };

        let data = self.services.decoder.decode(bytes.clone())?;
        if let Err(err) = self.services.file_store.store_file(&self.cache_path, &bytes) {
            // the texture is still usable this session
            bevy::log::warn!("failed to persist {}: {err}", self.cache_path);
        }
        self.services
            .cache
            .put(self.key, Arc::new(data), epoch_ms());
        Ok(TileLoadStatus::Loaded { from_cache: false })
    }

    async fn run(self) -> TileLoadOutcome {
        if self.cancel.is_cancelled() {
            return TileLoadOutcome {
                layer: self.layer,
                key: self.key,
                status: TileLoadStatus::Cancelled,
            };
        }
        if !self.stale_limit.is_zero() && self.enqueued_at.elapsed() > self.stale_limit {
            return TileLoadOutcome {
                layer: self.layer,
                key: self.key,
                status: TileLoadStatus::Stale,
            };
        }

        let result = match self.load_local() {
            Some(result) => result,
            None => self.load_remote().await,
        };

        let status = match result {
            Ok(status) => {
                self.absent.unmark_resource_absent(self.key);
                self.services
                    .listener
                    .on_change(&self.layer, LayerChange::TileLoaded(self.key));
                status
            }
            Err(err) => {
                bevy::log::debug!("tile {} failed to load: {err}", self.key);
                self.absent.mark_resource_absent(self.key);
                self.services
                    .listener
                    .on_change(&self.layer, LayerChange::TileFailed(self.key));
                TileLoadStatus::Failed(err)
            }
        };

        TileLoadOutcome {
            layer: self.layer,
            key: self.key,
            status,
        }
    }
}

impl Job for RetrieveTileJob {
    type Outcome = TileLoadOutcome;

    fn name(&self) -> String {
        format!("retrieve tile {} of {}", self.key, self.layer)
    }

    fn perform(self) -> AsyncReturn<Self::Outcome> {
        Box::pin(async move {
            #[cfg(not(target_arch = "wasm32"))]
            {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.run()),
                    Err(err) => {
                        bevy::log::error!("failed to start retrieval runtime: {err}");
                        let absent = self.absent.clone();
                        let listener = self.services.listener.clone();
                        absent.mark_resource_absent(self.key);
                        listener.on_change(&self.layer, LayerChange::TileFailed(self.key));
                        TileLoadOutcome {
                            layer: self.layer,
                            key: self.key,
                            status: TileLoadStatus::Failed(err.into()),
                        }
                    }
                }
            }
            #[cfg(target_arch = "wasm32")]
            {
                self.run().await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::change::{ChangeListener, LayerChange};
    use crate::decoder::RawTextureDecoder;
    use crate::file_store::{FileStore, LocalFileStore};
    use crate::memory_cache::MemoryCache;
    use crate::retriever::{NetworkStatus, Retriever};

    struct StaticRetriever {
        response: Result<&'static [u8], u16>,
    }

    impl Retriever for StaticRetriever {
        fn retrieve(&self, _url: String) -> AsyncReturn<Result<Bytes, RetrieveError>> {
            let response = self
                .response
                .map(Bytes::from_static)
                .map_err(RetrieveError::Status);
            Box::pin(async move { response })
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        changes: StdMutex<Vec<(String, LayerChange)>>,
    }

    impl ChangeListener for RecordingListener {
        fn on_change(&self, layer: &str, change: LayerChange) {
            self.changes
                .lock()
                .unwrap()
                .push((layer.to_string(), change));
        }
    }

    fn scratch_root(tag: &str) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!(
            "tellus-retrieval-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_dir_all(&root);
        root
    }

    fn services(
        root: &std::path::Path,
        response: Result<&'static [u8], u16>,
        listener: Arc<RecordingListener>,
    ) -> LayerServices {
        LayerServices {
            file_store: Arc::new(LocalFileStore::new(root)),
            retriever: Arc::new(StaticRetriever { response }),
            decoder: Arc::new(RawTextureDecoder),
            listener,
            network: Arc::new(NetworkStatus::new(3, Duration::from_secs(60))),
            cache: Arc::new(MemoryCache::new(1024 * 1024, 768 * 1024)),
        }
    }

    fn job(services: LayerServices, absent: Arc<AbsentResourceList>) -> RetrieveTileJob {
        RetrieveTileJob {
            layer: "bmng".to_string(),
            key: TileKey::new(1, 2, 3),
            cache_path: "earth/bmng/1/2/2_3.png".to_string(),
            url: "https://tiles.example.com/1/2/3.png".to_string(),
            expiry_time_ms: 0,
            enqueued_at: instant::Instant::now(),
            stale_limit: Duration::ZERO,
            services,
            absent,
            cancel: CancelFlag::new(),
        }
    }

    #[test]
    fn test_queue_orders_by_priority_then_drops_rest() {
        let queue = RetrievalQueue::new();
        assert!(queue.enqueue(TileKey::new(0, 0, 0), 9.0));
        assert!(queue.enqueue(TileKey::new(0, 0, 1), 1.0));
        assert!(queue.enqueue(TileKey::new(0, 0, 2), 5.0));
        let taken = queue.drain(2);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].key, TileKey::new(0, 0, 1));
        assert_eq!(taken[1].key, TileKey::new(0, 0, 2));
        // the leftover request was discarded, not left queued
        assert!(!queue.is_pending(TileKey::new(0, 0, 0)));
        // drained requests hold their in-flight slots
        assert!(queue.is_pending(TileKey::new(0, 0, 1)));
        assert_eq!(queue.in_flight_len(), 2);
    }

    #[test]
    fn test_queue_deduplicates() {
        let queue = RetrievalQueue::new();
        let key = TileKey::new(2, 1, 1);
        assert!(queue.enqueue(key, 3.0));
        assert!(!queue.enqueue(key, 1.0));
        let taken = queue.drain(8);
        assert_eq!(taken.len(), 1);
        // in-flight keys stay deduplicated until completed
        assert!(!queue.enqueue(key, 1.0));
        queue.complete(key);
        assert!(queue.enqueue(key, 1.0));
    }

    #[test]
    fn test_drain_respects_existing_in_flight() {
        let queue = RetrievalQueue::new();
        queue.enqueue(TileKey::new(0, 0, 0), 1.0);
        queue.drain(1);
        queue.enqueue(TileKey::new(0, 0, 1), 1.0);
        // budget of 1 is already used by the in-flight retrieval
        assert!(queue.drain(1).is_empty());
    }

    #[test]
    fn test_remote_success_caches_persists_notifies_once() {
        let root = scratch_root("remote-ok");
        let listener = Arc::new(RecordingListener::default());
        let services = services(&root, Ok(b"texture bytes"), listener.clone());
        let absent = Arc::new(AbsentResourceList::new(1, Duration::from_secs(60)));
        absent.mark_resource_absent(TileKey::new(1, 2, 3));
        let job = job(services.clone(), absent.clone());

        let outcome = pollster::block_on(job.run());
        assert!(matches!(
            outcome.status,
            TileLoadStatus::Loaded { from_cache: false }
        ));
        assert!(services.cache.contains(TileKey::new(1, 2, 3)));
        assert!(services
            .file_store
            .find_local_file("earth/bmng/1/2/2_3.png")
            .is_some());
        assert!(!absent.is_resource_absent(TileKey::new(1, 2, 3)));
        let changes = listener.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[0],
            (
                "bmng".to_string(),
                LayerChange::TileLoaded(TileKey::new(1, 2, 3))
            )
        );
        drop(changes);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_local_hit_skips_network() {
        let root = scratch_root("local-hit");
        let listener = Arc::new(RecordingListener::default());
        // the retriever would fail; a local hit must never reach it
        let services = services(&root, Err(500), listener.clone());
        services
            .file_store
            .store_file("earth/bmng/1/2/2_3.png", b"cached bytes")
            .unwrap();
        let absent = Arc::new(AbsentResourceList::new(1, Duration::from_secs(60)));
        let job = job(services.clone(), absent);

        let outcome = pollster::block_on(job.run());
        assert!(matches!(
            outcome.status,
            TileLoadStatus::Loaded { from_cache: true }
        ));
        assert_eq!(listener.changes.lock().unwrap().len(), 1);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_corrupt_local_file_dropped_and_refetched() {
        let root = scratch_root("corrupt");
        let listener = Arc::new(RecordingListener::default());
        let services = services(&root, Ok(b"fresh bytes"), listener.clone());
        // a zero-length file fails to decode, so the local stage must delete
        // it and hand the request to the network
        services
            .file_store
            .store_file("earth/bmng/1/2/2_3.png", b"")
            .unwrap();
        let absent = Arc::new(AbsentResourceList::new(1, Duration::from_secs(60)));
        let job = job(services.clone(), absent);

        let outcome = pollster::block_on(job.run());
        assert!(matches!(
            outcome.status,
            TileLoadStatus::Loaded { from_cache: false }
        ));
        assert!(services.cache.contains(TileKey::new(1, 2, 3)));
        let path = services
            .file_store
            .find_local_file("earth/bmng/1/2/2_3.png")
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"fresh bytes");
        assert_eq!(listener.changes.lock().unwrap().len(), 1);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_server_error_marks_absent() {
        let root = scratch_root("server-err");
        let listener = Arc::new(RecordingListener::default());
        let services = services(&root, Err(404), listener.clone());
        let absent = Arc::new(AbsentResourceList::new(1, Duration::from_secs(60)));
        let job = job(services.clone(), absent.clone());

        let outcome = pollster::block_on(job.run());
        assert!(matches!(
            outcome.status,
            TileLoadStatus::Failed(TileLoadError::Retrieve(_))
        ));
        assert!(absent.is_resource_absent(TileKey::new(1, 2, 3)));
        assert!(!services.cache.contains(TileKey::new(1, 2, 3)));
        assert_eq!(
            listener.changes.lock().unwrap()[0].1,
            LayerChange::TileFailed(TileKey::new(1, 2, 3))
        );
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_network_disabled_fails_without_attempt() {
        let root = scratch_root("net-off");
        let listener = Arc::new(RecordingListener::default());
        let services = services(&root, Ok(b"unreachable"), listener.clone());
        services.network.set_network_enabled(false);
        let absent = Arc::new(AbsentResourceList::new(1, Duration::from_secs(60)));
        let job = job(services.clone(), absent.clone());

        let outcome = pollster::block_on(job.run());
        assert!(matches!(
            outcome.status,
            TileLoadStatus::Failed(TileLoadError::NetworkDisabled)
        ));
        assert!(absent.is_resource_absent(TileKey::new(1, 2, 3)));
        assert!(!services.cache.contains(TileKey::new(1, 2, 3)));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_cancelled_job_does_nothing() {
        let root = scratch_root("cancelled");
        let listener = Arc::new(RecordingListener::default());
        let services = services(&root, Ok(b"unreachable"), listener.clone());
        let absent = Arc::new(AbsentResourceList::new(1, Duration::from_secs(60)));
        let job = job(services.clone(), absent.clone());
        job.cancel.cancel();

        let outcome = pollster::block_on(job.run());
        assert!(matches!(outcome.status, TileLoadStatus::Cancelled));
        assert!(!services.cache.contains(TileKey::new(1, 2, 3)));
        assert!(!absent.is_resource_absent(TileKey::new(1, 2, 3)));
        assert!(listener.changes.lock().unwrap().is_empty());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_stale_request_skipped() {
        let root = scratch_root("stale-req");
        let listener = Arc::new(RecordingListener::default());
        let services = services(&root, Ok(b"unreachable"), listener.clone());
        let absent = Arc::new(AbsentResourceList::new(1, Duration::from_secs(60)));
        let mut job = job(services.clone(), absent.clone());
        job.stale_limit = Duration::from_millis(1);
        std::thread::sleep(Duration::from_millis(5));

        let outcome = pollster::block_on(job.run());
        assert!(matches!(outcome.status, TileLoadStatus::Stale));
        assert!(!services.cache.contains(TileKey::new(1, 2, 3)));
        assert!(!absent.is_resource_absent(TileKey::new(1, 2, 3)));
        assert!(listener.changes.lock().unwrap().is_empty());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_expired_local_file_refetched() {
        let root = scratch_root("expired");
        let listener = Arc::new(RecordingListener::default());
        let services = services(&root, Ok(b"fresh bytes"), listener.clone());
        services
            .file_store
            .store_file("earth/bmng/1/2/2_3.png", b"stale bytes")
            .unwrap();
        let absent = Arc::new(AbsentResourceList::new(1, Duration::from_secs(60)));
        let mut job = job(services.clone(), absent);
        // everything written before the far future is stale
        job.expiry_time_ms = u64::MAX;

        let outcome = pollster::block_on(job.run());
        assert!(matches!(
            outcome.status,
            TileLoadStatus::Loaded { from_cache: false }
        ));
        let path = services
            .file_store
            .find_local_file("earth/bmng/1/2/2_3.png")
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"fresh bytes");
        let _ = fs::remove_dir_all(&root);
    }
}
