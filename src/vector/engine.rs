//! Lifecycle of logical indexes.
//!
//! An [`IndexManager`] owns one logical index: its descriptor, its
//! [`SegmentStore`](crate::vector::segment::store::SegmentStore) and the
//! background work that keeps it searchable. Writes land in the active buffer
//! generation and never wait for flushes or builds. A flush freezes the
//! generation, seals it into a segment and then schedules the ANN build for
//! that segment on the [`scheduler::BuildScheduler`]; until the build is
//! installed the segment is searched by flat scan.
//!
//! Failed builds are retried with exponential backoff. A segment whose
//! attempts are exhausted stays on flat scan and is reported by
//! [`IndexManager::health`]. A built structure is searchable as soon as it is
//! installed; writing it to storage is retried the same way, and a structure
//! that could not be written is reported as unpersisted.
//!
//! ```
//! use quiver::storage::memory::MemoryStorage;
//! use quiver::vector::core::distance::DistanceMetric;
//! use quiver::vector::core::record::VectorRecord;
//! use quiver::vector::engine::IndexManager;
//! use quiver::vector::engine::config::EngineConfig;
//! use quiver::vector::index::config::IndexDescriptor;
//! use quiver::vector::search::QueryRequest;
//! use std::sync::Arc;
//!
//! # fn main() -> quiver::error::Result<()> {
//! let manager = IndexManager::create_standalone(
//!     "docs",
//!     IndexDescriptor::flat(2, DistanceMetric::Euclidean),
//!     Arc::new(MemoryStorage::new()),
//!     EngineConfig::inline(),
//! )?;
//! manager.put_vectors(vec![
//!     VectorRecord::new("a", vec![0.0, 0.0]),
//!     VectorRecord::new("b", vec![1.0, 1.0]),
//! ])?;
//! let response = manager.query(&QueryRequest::new(vec![0.0, 0.0], 1))?;
//! assert_eq!(response.keys(), vec!["a"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cursor;
pub mod registry;
pub mod scheduler;
pub mod service;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{QuiverError, Result};
use crate::storage::Storage;
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::metadata::validate_metadata;
use crate::vector::core::record::{SegmentId, VectorRecord};
use crate::vector::engine::config::EngineConfig;
use crate::vector::engine::cursor::{ListVectorsPage, ListVectorsRequest, VectorEntry, list_page};
use crate::vector::engine::scheduler::BuildScheduler;
use crate::vector::index::config::{BackendKind, IndexDescriptor};
use crate::vector::index::{AnnIndex, VectorSource};
use crate::vector::search::{QueryPlanner, QueryRequest, QueryResponse};
use crate::vector::segment::RecordSource;
use crate::vector::segment::store::{CompactionOutcome, SegmentStore};

/// Object holding the serialized [`IndexDescriptor`].
pub const DESCRIPTOR_NAME: &str = "index.json";

/// Coarse lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Nothing written yet (or everything compacted away).
    Empty,
    /// Accepting writes; no flush or build in flight.
    Buffering,
    /// A generation is being sealed or a segment's ANN structure is being built.
    Flushing,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexState::Empty => "empty",
            IndexState::Buffering => "buffering",
            IndexState::Flushing => "flushing",
        };
        write!(f, "{name}")
    }
}

/// A segment whose build or persistence attempts were exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedSegment {
    pub segment_id: SegmentId,
    pub attempts: u32,
    pub last_error: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHealth {
    pub healthy: bool,
    pub pending_builds: Vec<SegmentId>,
    /// Segments left on flat scan after their builds failed.
    pub degraded_segments: Vec<DegradedSegment>,
    /// Segments searched through a built structure that is not in storage,
    /// so a reopen rebuilds it.
    pub unpersisted_segments: Vec<DegradedSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub backend: BackendKind,
    pub state: IndexState,
    /// Visible records across segments and buffers.
    pub vector_count: usize,
    pub sealed_segments: usize,
    pub sealed_slots: usize,
    pub indexed_segments: usize,
    pub buffered_records: usize,
    pub buffered_bytes: usize,
    pub tombstones: usize,
    pub pending_builds: usize,
    pub degraded_segments: usize,
    pub unpersisted_segments: usize,
    pub compaction_epoch: u64,
}

#[derive(Debug, Default)]
struct BuildTracker {
    pending: AHashSet<SegmentId>,
    degraded: AHashMap<SegmentId, DegradedSegment>,
    unpersisted: AHashMap<SegmentId, DegradedSegment>,
}

struct IndexInner {
    name: String,
    descriptor: IndexDescriptor,
    config: EngineConfig,
    store: SegmentStore,
    planner: QueryPlanner,
    scheduler: Arc<BuildScheduler>,
    builds: Mutex<BuildTracker>,
    flush_queued: AtomicBool,
    flushes_running: AtomicUsize,
    dropped: AtomicBool,
}

/// Handle to one logical index. Cloning is cheap and shares the index.
#[derive(Clone)]
pub struct IndexManager {
    inner: Arc<IndexInner>,
}

impl fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexManager")
            .field("name", &self.inner.name)
            .field("descriptor", &self.inner.descriptor)
            .finish()
    }
}

impl IndexManager {
    /// Create a new index in `storage`, which must be the index's own namespace.
    pub fn create(
        name: impl Into<String>,
        descriptor: IndexDescriptor,
        storage: Arc<dyn Storage>,
        config: EngineConfig,
        scheduler: Arc<BuildScheduler>,
    ) -> Result<Self> {
        descriptor.validate(config.max_dimension)?;
        if storage.exists(DESCRIPTOR_NAME)? {
            return Err(QuiverError::already_exists("Index descriptor already present"));
        }
        storage.put(DESCRIPTOR_NAME, &serde_json::to_vec_pretty(&descriptor)?)?;
        let store = SegmentStore::create(storage, descriptor.dimension)?;

        let manager = Self::assemble(name.into(), descriptor, store, config, scheduler);
        info!(
            "Created index {} (dimension {}, {}, {})",
            manager.inner.name,
            manager.inner.descriptor.dimension,
            manager.inner.descriptor.metric.name(),
            manager.inner.descriptor.backend_kind()
        );
        Ok(manager)
    }

    /// Create an index with a scheduler of its own.
    pub fn create_standalone(
        name: impl Into<String>,
        descriptor: IndexDescriptor,
        storage: Arc<dyn Storage>,
        config: EngineConfig,
    ) -> Result<Self> {
        let scheduler = Arc::new(scheduler_for(&config)?);
        Self::create(name, descriptor, storage, config, scheduler)
    }

    /// Open an existing index and schedule builds for segments that lack one.
    pub fn open(
        name: impl Into<String>,
        storage: Arc<dyn Storage>,
        config: EngineConfig,
        scheduler: Arc<BuildScheduler>,
    ) -> Result<Self> {
        let name = name.into();
        let bytes = storage
            .try_get(DESCRIPTOR_NAME)?
            .ok_or_else(|| QuiverError::not_found(format!("Index {name}")))?;
        let descriptor: IndexDescriptor = serde_json::from_slice(&bytes)
            .map_err(|e| QuiverError::corrupt(format!("Descriptor of index {name}: {e}")))?;
        let store = SegmentStore::open(storage, descriptor.dimension)?;

        let manager = Self::assemble(name, descriptor, store, config, scheduler);
        let scheduled = manager.build_pending();
        debug!("Opened index {} ({scheduled} builds scheduled)", manager.inner.name);
        Ok(manager)
    }

    fn assemble(
        name: String,
        descriptor: IndexDescriptor,
        store: SegmentStore,
        config: EngineConfig,
        scheduler: Arc<BuildScheduler>,
    ) -> Self {
        let planner = QueryPlanner::new(&descriptor, config.planner_config());
        Self {
            inner: Arc::new(IndexInner {
                name,
                descriptor,
                config,
                store,
                planner,
                scheduler,
                builds: Mutex::new(BuildTracker::default()),
                flush_queued: AtomicBool::new(false),
                flushes_running: AtomicUsize::new(0),
                dropped: AtomicBool::new(false),
            }),
        }
    }

    fn upgrade(weak: &Weak<IndexInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.inner.descriptor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SegmentStore {
        &self.inner.store
    }

    /// Insert or overwrite a batch of records. The batch is applied entirely
    /// or not at all.
    pub fn put_vectors(&self, records: Vec<VectorRecord>) -> Result<()> {
        let config = &self.inner.config;
        self.check_batch(records.len())?;
        let limits = config.metadata_limits();
        for record in &records {
            self.check_key(&record.key)?;
            validate_metadata(&record.metadata, &limits)?;
        }

        let count = records.len();
        self.inner.store.append_batch(records)?;
        debug!("Index {}: buffered {count} records", self.inner.name);
        self.maybe_flush()
    }

    /// Tombstone the given keys. Returns how many of them were visible.
    pub fn delete_vectors<S: AsRef<str>>(&self, keys: &[S]) -> Result<usize> {
        self.check_batch(keys.len())?;
        for key in keys {
            self.check_key(key.as_ref())?;
        }
        let deleted = self.inner.store.delete_batch(keys);
        debug!("Index {}: deleted {deleted} of {} keys", self.inner.name, keys.len());
        self.maybe_flush()?;
        Ok(deleted)
    }

    /// The visible records for `keys`, in request order. Missing keys are skipped.
    pub fn get_vectors<S: AsRef<str>>(
        &self,
        keys: &[S],
        include_vector: bool,
        include_metadata: bool,
    ) -> Result<Vec<VectorEntry>> {
        self.check_batch(keys.len())?;
        let snapshot = self.inner.store.snapshot();
        Ok(keys
            .iter()
            .filter_map(|key| snapshot.lookup(key.as_ref()))
            .map(|(source, offset)| {
                VectorEntry::from_source(source.records(), offset, include_vector, include_metadata)
            })
            .collect())
    }

    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let snapshot = self.inner.store.snapshot();
        let response = self.inner.planner.execute(&snapshot, request)?;
        debug!(
            "Index {}: query k={} returned {} hits in {:?} ({:?})",
            self.inner.name,
            request.top_k,
            response.hits.len(),
            started.elapsed(),
            response.stats
        );
        Ok(response)
    }

    pub fn list_vectors(&self, request: &ListVectorsRequest) -> Result<ListVectorsPage> {
        list_page(&self.inner.store.snapshot(), request, self.inner.config.max_list_page)
    }

    /// Seal the active buffer into a segment and schedule its ANN build.
    /// Returns `None` when the buffer was empty.
    pub fn flush(&self) -> Result<Option<SegmentId>> {
        self.inner.flushes_running.fetch_add(1, Ordering::SeqCst);
        let flushed = self.inner.store.flush();
        self.inner.flushes_running.fetch_sub(1, Ordering::SeqCst);

        let flushed = flushed?;
        if let Some(id) = flushed {
            info!("Index {}: flushed segment {id}", self.inner.name);
            self.build_pending();
        }
        Ok(flushed)
    }

    /// Schedule builds for every eligible segment that has no ANN structure,
    /// is not already queued and has not been marked degraded. Returns the
    /// number of builds scheduled.
    pub fn build_pending(&self) -> usize {
        if self.inner.descriptor.backend_kind().is_exact() {
            return 0;
        }
        let snapshot = self.inner.store.snapshot();
        let candidates: Vec<SegmentId> = snapshot
            .segments()
            .iter()
            .filter(|live| live.index.is_none())
            .filter(|live| live.segment.live_count() >= self.inner.config.flat_threshold.max(1))
            .map(|live| live.segment.id())
            .collect();

        candidates
            .into_iter()
            .filter(|&id| self.schedule_build(id))
            .count()
    }

    fn schedule_build(&self, id: SegmentId) -> bool {
        {
            let mut builds = self.inner.builds.lock();
            if builds.degraded.contains_key(&id) || !builds.pending.insert(id) {
                return false;
            }
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.submit(move || {
            if let Some(manager) = IndexManager::upgrade(&weak) {
                manager.run_build(id);
            }
        });
        true
    }

    fn run_build(&self, id: SegmentId) {
        let installed = match self.with_retries(id, "build", || self.build_segment(id)) {
            Ok(installed) => installed,
            Err(failure) => {
                error!(
                    "Index {}: giving up on segment {id} after {} attempts, \
                     it stays on flat scan: {}",
                    self.inner.name, failure.attempts, failure.last_error
                );
                let mut builds = self.inner.builds.lock();
                builds.pending.remove(&id);
                builds.degraded.insert(id, failure);
                return;
            }
        };
        if !installed {
            debug!(
                "Index {}: segment {id} was compacted away or dropped before its build finished",
                self.inner.name
            );
        } else if self.inner.config.persist_ann_indexes {
            let persisted = self.with_retries(id, "persist", || self.inner.store.persist_index(id));
            if let Err(failure) = persisted {
                error!(
                    "Index {}: index of segment {id} is searchable but was not persisted \
                     after {} attempts: {}",
                    self.inner.name, failure.attempts, failure.last_error
                );
                self.inner.builds.lock().unpersisted.insert(id, failure);
            }
        }
        self.inner.builds.lock().pending.remove(&id);
    }

    /// Run `step` until it succeeds or `build_max_attempts` is exhausted,
    /// sleeping with exponential backoff in between. A dropped index stops
    /// retrying and reports `Ok(false)`.
    fn with_retries<F>(
        &self,
        id: SegmentId,
        step: &str,
        mut attempt_once: F,
    ) -> std::result::Result<bool, DegradedSegment>
    where
        F: FnMut() -> Result<bool>,
    {
        let max_attempts = self.inner.config.build_max_attempts;
        let mut backoff = Duration::from_millis(self.inner.config.build_backoff_ms);
        let mut attempt = 0;
        loop {
            if self.inner.dropped.load(Ordering::SeqCst) {
                return Ok(false);
            }
            attempt += 1;
            match attempt_once() {
                Ok(done) => return Ok(done),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "Index {}: {step} of segment {id} failed \
                         (attempt {attempt}/{max_attempts}), retrying in {backoff:?}: {e}",
                        self.inner.name
                    );
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    return Err(DegradedSegment {
                        segment_id: id,
                        attempts: attempt,
                        last_error: e.to_string(),
                        since: Utc::now(),
                    });
                }
            }
        }
    }

    /// Build the structure for segment `id` and make it searchable. Returns
    /// `false` if the segment is gone.
    fn build_segment(&self, id: SegmentId) -> Result<bool> {
        let Some(segment) = self
            .inner
            .store
            .snapshot()
            .segment(id)
            .map(|live| live.segment.clone())
        else {
            return Ok(false);
        };

        let started = Instant::now();
        let index = AnnIndex::build(&self.inner.descriptor, segment.as_ref())?;
        let installed = self.inner.store.install_index(id, Arc::new(index));
        if installed {
            info!(
                "Index {}: built {} over segment {id} ({} records) in {:?}",
                self.inner.name,
                self.inner.descriptor.backend_kind(),
                segment.len(),
                started.elapsed()
            );
        }
        Ok(installed)
    }

    /// Rewrite all sealed segments into one, then schedule its build.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        let outcome = self.inner.store.compact()?;
        {
            let mut builds = self.inner.builds.lock();
            for id in &outcome.segments_removed {
                builds.degraded.remove(id);
                builds.unpersisted.remove(id);
            }
        }
        self.build_pending();
        Ok(outcome)
    }

    pub fn state(&self) -> IndexState {
        let busy = self.inner.flushes_running.load(Ordering::SeqCst) > 0
            || self.inner.flush_queued.load(Ordering::SeqCst)
            || !self.inner.builds.lock().pending.is_empty();
        if busy {
            return IndexState::Flushing;
        }
        let snapshot = self.inner.store.snapshot();
        let nothing_written = snapshot.segments().is_empty()
            && snapshot.frozen().is_empty()
            && snapshot.buffer().is_empty();
        if nothing_written {
            IndexState::Empty
        } else {
            IndexState::Buffering
        }
    }

    pub fn health(&self) -> IndexHealth {
        let builds = self.inner.builds.lock();
        let mut pending_builds: Vec<SegmentId> = builds.pending.iter().copied().collect();
        pending_builds.sort_unstable();
        let degraded_segments = sorted_failures(&builds.degraded);
        let unpersisted_segments = sorted_failures(&builds.unpersisted);
        IndexHealth {
            healthy: degraded_segments.is_empty() && unpersisted_segments.is_empty(),
            pending_builds,
            degraded_segments,
            unpersisted_segments,
        }
    }

    pub fn stats(&self) -> IndexStats {
        let store = self.inner.store.stats();
        let vector_count = self.inner.store.snapshot().visible_count();
        let (pending_builds, degraded_segments, unpersisted_segments) = {
            let builds = self.inner.builds.lock();
            (builds.pending.len(), builds.degraded.len(), builds.unpersisted.len())
        };
        IndexStats {
            name: self.inner.name.clone(),
            dimension: self.inner.descriptor.dimension,
            metric: self.inner.descriptor.metric,
            backend: self.inner.descriptor.backend_kind(),
            state: self.state(),
            vector_count,
            sealed_segments: store.sealed_segments,
            sealed_slots: store.sealed_slots,
            indexed_segments: store.indexed_segments,
            buffered_records: store.buffered_records,
            buffered_bytes: store.buffered_bytes,
            tombstones: store.tombstones,
            pending_builds,
            degraded_segments,
            unpersisted_segments,
            compaction_epoch: store.compaction_epoch,
        }
    }

    /// Wait for queued flushes and builds. Returns `false` on timeout.
    pub fn wait_for_builds(&self, timeout: Option<Duration>) -> bool {
        self.inner.scheduler.wait_idle(timeout)
    }

    /// Stop background work for this index and delete all of its objects.
    ///
    /// Queued builds and flushes are skipped. One already running finishes in
    /// memory but writes nothing, since the store refuses writes once
    /// destroyed.
    pub fn destroy(&self) -> Result<()> {
        self.inner.dropped.store(true, Ordering::SeqCst);
        self.inner.store.destroy()?;
        info!("Index {} deleted", self.inner.name);
        Ok(())
    }

    fn check_batch(&self, len: usize) -> Result<()> {
        let max_batch = self.inner.config.max_batch;
        if len == 0 || len > max_batch {
            return Err(QuiverError::validation(format!(
                "Batch must contain between 1 and {max_batch} items, got {len}"
            )));
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<()> {
        let max_key_bytes = self.inner.config.max_key_bytes;
        if key.is_empty() || key.len() > max_key_bytes {
            return Err(QuiverError::validation(format!(
                "Vector key length must be between 1 and {max_key_bytes} bytes"
            )));
        }
        Ok(())
    }

    /// Flush once the active buffer crosses a threshold: on a worker when
    /// background tasks are enabled, inline otherwise.
    fn maybe_flush(&self) -> Result<()> {
        if self.inner.dropped.load(Ordering::SeqCst) {
            return Ok(());
        }
        let (records, bytes) = self.inner.store.buffer_usage();
        let config = &self.inner.config;
        if records < config.flush_max_records && bytes < config.flush_max_bytes {
            return Ok(());
        }

        if self.inner.scheduler.is_inline() {
            self.flush()?;
            return Ok(());
        }
        if self.inner.flush_queued.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Freeze now so later writes go to a fresh generation even if the
        // queued flush is slow to start.
        self.inner.store.freeze();
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.submit(move || {
            let Some(manager) = IndexManager::upgrade(&weak) else {
                return;
            };
            manager.inner.flush_queued.store(false, Ordering::SeqCst);
            if manager.inner.dropped.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = manager.flush() {
                error!("Index {}: background flush failed: {e}", manager.inner.name);
            }
        });
        Ok(())
    }
}

fn sorted_failures(failures: &AHashMap<SegmentId, DegradedSegment>) -> Vec<DegradedSegment> {
    let mut sorted: Vec<DegradedSegment> = failures.values().cloned().collect();
    sorted.sort_by_key(|failure| failure.segment_id);
    sorted
}

/// The scheduler matching `config.background_tasks`.
pub fn scheduler_for(config: &EngineConfig) -> Result<BuildScheduler> {
    if config.background_tasks {
        BuildScheduler::new(config.build_workers)
    } else {
        Ok(BuildScheduler::inline())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::vector::filter::FilterExpr;
    use crate::vector::index::config::{HnswParams, IvfPqParams};

    fn inline_config() -> EngineConfig {
        EngineConfig {
            flat_threshold: 8,
            build_backoff_ms: 1,
            ..EngineConfig::inline()
        }
    }

    fn manager(descriptor: IndexDescriptor, config: EngineConfig) -> IndexManager {
        let storage = Arc::new(MemoryStorage::new());
        IndexManager::create_standalone("test", descriptor, storage, config).unwrap()
    }

    fn grid(n: usize) -> Vec<VectorRecord> {
        (0..n)
            .map(|i| {
                VectorRecord::new(format!("k{i:03}"), vec![(i % 10) as f32, (i / 10) as f32])
                    .with_field("even", i % 2 == 0)
            })
            .collect()
    }

    #[test]
    fn test_state_transitions() {
        let index = manager(IndexDescriptor::flat(2, DistanceMetric::Euclidean), inline_config());
        assert_eq!(index.state(), IndexState::Empty);
        index.put_vectors(grid(3)).unwrap();
        assert_eq!(index.state(), IndexState::Buffering);
        index.flush().unwrap();
        assert_eq!(index.state(), IndexState::Buffering);
        assert_eq!(index.stats().sealed_segments, 1);
    }

    #[test]
    fn test_flush_builds_hnsw_inline() {
        let descriptor = IndexDescriptor::hnsw(2, DistanceMetric::Euclidean, HnswParams::default());
        let index = manager(descriptor, inline_config());
        index.put_vectors(grid(100)).unwrap();
        index.flush().unwrap();

        let stats = index.stats();
        assert_eq!(stats.indexed_segments, 1);
        assert_eq!(stats.pending_builds, 0);
        assert_eq!(stats.vector_count, 100);
        assert!(index.health().healthy);

        let request =
            QueryRequest::new(vec![0.0, 0.0], 3).with_filter(FilterExpr::equals("even", true));
        let response = index.query(&request).unwrap();
        assert_eq!(response.keys(), vec!["k000", "k010", "k002"]);
    }

    #[test]
    fn test_small_segments_stay_flat() {
        let descriptor =
            IndexDescriptor::ivf_pq(2, DistanceMetric::Euclidean, IvfPqParams::default());
        let index = manager(descriptor, inline_config());
        index.put_vectors(grid(5)).unwrap();
        index.flush().unwrap();
        assert_eq!(index.stats().indexed_segments, 0);
        assert_eq!(index.build_pending(), 0);
    }

    #[test]
    fn test_auto_flush_on_record_threshold() {
        let config = EngineConfig {
            flush_max_records: 10,
            ..inline_config()
        };
        let index = manager(IndexDescriptor::flat(2, DistanceMetric::Euclidean), config);
        index.put_vectors(grid(9)).unwrap();
        assert_eq!(index.stats().sealed_segments, 0);
        index.put_vectors(vec![VectorRecord::new("last", vec![0.5, 0.5])]).unwrap();
        let stats = index.stats();
        assert_eq!(stats.sealed_segments, 1);
        assert_eq!(stats.buffered_records, 0);
        assert_eq!(stats.vector_count, 10);
    }

    #[test]
    fn test_background_flush_and_build() {
        let config = EngineConfig {
            flush_max_records: 50,
            flat_threshold: 8,
            background_tasks: true,
            build_workers: 2,
            ..EngineConfig::default()
        };
        let descriptor = IndexDescriptor::hnsw(2, DistanceMetric::Euclidean, HnswParams::default());
        let index = manager(descriptor, config);
        for chunk in grid(200).chunks(25) {
            index.put_vectors(chunk.to_vec()).unwrap();
        }
        index.flush().unwrap();
        assert!(index.wait_for_builds(Some(Duration::from_secs(30))));

        let stats = index.stats();
        assert_eq!(stats.vector_count, 200);
        assert_eq!(stats.buffered_records, 0);
        assert_eq!(stats.indexed_segments, stats.sealed_segments);
        assert_eq!(index.state(), IndexState::Buffering);
    }

    #[test]
    fn test_request_limits() {
        let config = EngineConfig {
            max_batch: 2,
            max_key_bytes: 4,
            max_metadata_keys: 1,
            ..inline_config()
        };
        let index = manager(IndexDescriptor::flat(2, DistanceMetric::Euclidean), config);
        assert!(index.put_vectors(Vec::new()).unwrap_err().is_validation());
        assert!(index.put_vectors(grid(3)).unwrap_err().is_validation());
        assert!(index
            .put_vectors(vec![VectorRecord::new("toolong", vec![0.0, 0.0])])
            .unwrap_err()
            .is_validation());
        let fat = VectorRecord::new("a", vec![0.0, 0.0]).with_field("x", 1).with_field("y", 2);
        assert!(index.put_vectors(vec![fat]).unwrap_err().is_validation());
        assert_eq!(index.stats().buffered_records, 0);
    }

    #[test]
    fn test_get_vectors_skips_missing() {
        let index = manager(IndexDescriptor::flat(2, DistanceMetric::Euclidean), inline_config());
        index.put_vectors(grid(3)).unwrap();
        index.delete_vectors(&["k001"]).unwrap();
        let entries = index.get_vectors(&["k002", "k001", "nope", "k000"], true, false).unwrap();
        let keys: Vec<_> = entries.iter().map(|entry| entry.key.as_str()).collect();
        assert_eq!(keys, vec!["k002", "k000"]);
        assert_eq!(entries[0].vector, Some(vec![2.0, 0.0]));
        assert!(entries[0].metadata.is_none());
    }

    #[test]
    fn test_compaction_schedules_rebuild() {
        let descriptor = IndexDescriptor::hnsw(2, DistanceMetric::Euclidean, HnswParams::default());
        let index = manager(descriptor, inline_config());
        index.put_vectors(grid(20)).unwrap();
        index.flush().unwrap();
        index.put_vectors(grid(40)[20..].to_vec()).unwrap();
        index.flush().unwrap();
        assert_eq!(index.stats().indexed_segments, 2);

        let outcome = index.compact().unwrap();
        assert_eq!(outcome.records_kept, 40);
        let stats = index.stats();
        assert_eq!(stats.sealed_segments, 1);
        assert_eq!(stats.indexed_segments, 1);
        assert_eq!(stats.compaction_epoch, 1);
    }

    #[test]
    fn test_destroy_removes_descriptor() {
        let storage = Arc::new(MemoryStorage::new());
        let index = IndexManager::create_standalone(
            "gone",
            IndexDescriptor::flat(2, DistanceMetric::Euclidean),
            storage.clone(),
            inline_config(),
        )
        .unwrap();
        index.put_vectors(grid(2)).unwrap();
        index.flush().unwrap();
        index.destroy().unwrap();
        assert_eq!(storage.object_count(), 0);
    }
}
