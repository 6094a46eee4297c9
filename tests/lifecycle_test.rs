use std::sync::Arc;
use std::time::Duration;

use quiver::error::{QuiverError, Result};
use quiver::storage::Storage;
use quiver::storage::file::FileStorage;
use quiver::storage::memory::MemoryStorage;
use quiver::vector::core::distance::DistanceMetric;
use quiver::vector::core::record::VectorRecord;
use quiver::vector::engine::config::EngineConfig;
use quiver::vector::engine::cursor::ListVectorsRequest;
use quiver::vector::engine::registry::IndexRegistry;
use quiver::vector::engine::scheduler::BuildScheduler;
use quiver::vector::engine::{IndexManager, IndexState};
use quiver::vector::index::config::{HnswParams, IndexDescriptor};
use quiver::vector::search::QueryRequest;

fn grid_records(n: usize) -> Vec<VectorRecord> {
    (0..n)
        .map(|i| {
            VectorRecord::new(format!("k{i:03}"), vec![(i % 10) as f32, (i / 10) as f32])
                .with_field("row", (i / 10) as i64)
        })
        .collect()
}

fn hnsw_descriptor() -> IndexDescriptor {
    IndexDescriptor::hnsw(2, DistanceMetric::Euclidean, HnswParams::default())
}

fn small_threshold(config: EngineConfig) -> EngineConfig {
    EngineConfig {
        flat_threshold: 16,
        ..config
    }
}

#[test]
fn flushing_an_empty_buffer_is_a_no_op() -> Result<()> {
    let registry = IndexRegistry::new(Arc::new(MemoryStorage::new()), EngineConfig::inline())?;
    registry.create_index("idle", IndexDescriptor::flat(2, DistanceMetric::Euclidean))?;

    assert_eq!(registry.flush("idle")?, None);
    registry.put_vectors("idle", grid_records(5))?;
    assert!(registry.flush("idle")?.is_some());
    assert_eq!(registry.flush("idle")?, None);
    assert_eq!(registry.stats("idle")?.sealed_segments, 1);
    Ok(())
}

#[test]
fn queries_stay_exact_while_a_build_is_queued() -> Result<()> {
    let scheduler = Arc::new(BuildScheduler::new(1)?);
    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    scheduler.submit(move || {
        let _ = gate.recv();
    });

    let index = IndexManager::create(
        "gated",
        hnsw_descriptor(),
        Arc::new(MemoryStorage::new()),
        small_threshold(EngineConfig::default()),
        scheduler.clone(),
    )?;
    index.put_vectors(grid_records(100))?;
    index.flush()?;

    let stats = index.stats();
    assert_eq!(stats.indexed_segments, 0);
    assert_eq!(stats.pending_builds, 1);
    assert_eq!(index.state(), IndexState::Flushing);

    let response = index.query(&QueryRequest::new(vec![3.0, 4.0], 3))?;
    assert_eq!(response.keys(), vec!["k043", "k033", "k042"]);
    assert_eq!(response.stats.ann_searches, 0);
    assert!(response.stats.flat_scans >= 1);

    drop(release);
    assert!(index.wait_for_builds(Some(Duration::from_secs(30))));
    let stats = index.stats();
    assert_eq!(stats.indexed_segments, 1);
    assert_eq!(stats.pending_builds, 0);
    assert_eq!(index.state(), IndexState::Buffering);

    let response = index.query(&QueryRequest::new(vec![3.0, 4.0], 1))?;
    assert_eq!(response.keys(), vec!["k043"]);
    Ok(())
}

#[test]
fn cursor_pages_cover_every_record_once() -> Result<()> {
    let registry = IndexRegistry::new(Arc::new(MemoryStorage::new()), EngineConfig::inline())?;
    registry.create_index("pages", IndexDescriptor::flat(2, DistanceMetric::Euclidean))?;
    registry.put_vectors("pages", grid_records(25))?;
    registry.flush("pages")?;
    registry.put_vectors("pages", grid_records(30).split_off(25))?;

    let mut seen = Vec::new();
    let mut request = ListVectorsRequest::new().with_page_size(7);
    loop {
        let page = registry.list_vectors("pages", &request)?;
        assert!(page.vectors.len() <= 7);
        seen.extend(page.vectors.into_iter().map(|entry| entry.key));
        match page.next_cursor {
            Some(cursor) => request = request.with_cursor(cursor),
            None => break,
        }
    }
    seen.sort();
    let expected: Vec<String> = (0..30).map(|i| format!("k{i:03}")).collect();
    assert_eq!(seen, expected);
    Ok(())
}

#[test]
fn compaction_expires_outstanding_cursors() -> Result<()> {
    let registry = IndexRegistry::new(Arc::new(MemoryStorage::new()), EngineConfig::inline())?;
    registry.create_index("pages", IndexDescriptor::flat(2, DistanceMetric::Euclidean))?;
    registry.put_vectors("pages", grid_records(10))?;
    registry.flush("pages")?;

    let first = registry.list_vectors("pages", &ListVectorsRequest::new().with_page_size(3))?;
    let cursor = first.next_cursor.ok_or_else(|| QuiverError::internal("expected a cursor"))?;

    registry.delete_vectors("pages", &["k005"])?;
    registry.flush("pages")?;
    registry.compact("pages")?;

    let err = registry
        .list_vectors("pages", &ListVectorsRequest::new().with_cursor(cursor))
        .unwrap_err();
    assert!(matches!(err, QuiverError::CursorExpired(_)));
    assert_eq!(err.code(), "ValidationException");

    let restarted = registry.list_vectors("pages", &ListVectorsRequest::new().with_page_size(100))?;
    assert_eq!(restarted.vectors.len(), 9);
    Ok(())
}

#[test]
fn reopened_index_reloads_segments_and_ann_structures() -> Result<()> {
    let dir = tempfile::tempdir().map_err(|e| QuiverError::storage(e.to_string()))?;
    let config = small_threshold(EngineConfig::inline());
    let query = QueryRequest::new(vec![6.2, 1.9], 5);

    let before = {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path())?);
        let registry = IndexRegistry::new(storage, config.clone())?;
        registry.create_index("persisted", hnsw_descriptor())?;
        registry.put_vectors("persisted", grid_records(100))?;
        registry.flush("persisted")?;
        registry.delete_vectors("persisted", &["k026"])?;
        registry.flush("persisted")?;
        assert_eq!(registry.stats("persisted")?.indexed_segments, 1);
        registry.query("persisted", &query)?
    };

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path())?);
    let registry = IndexRegistry::open(storage, config)?;
    let stats = registry.stats("persisted")?;
    assert_eq!(stats.vector_count, 99);
    assert_eq!(stats.indexed_segments, 1);
    assert_eq!(stats.pending_builds, 0);

    let after = registry.query("persisted", &query)?;
    assert_eq!(after.keys(), before.keys());
    assert!(!after.keys().contains(&"k026"));
    Ok(())
}

/// Memory storage whose ANN writes always fail.
#[derive(Debug, Default)]
struct FailingAnnStorage {
    inner: MemoryStorage,
}

impl Storage for FailingAnnStorage {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.inner.get(name)
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        if name.ends_with(".ann") {
            return Err(QuiverError::storage(format!("injected failure writing {name}")));
        }
        self.inner.put(name, data)
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.inner.exists(name)
    }
}

#[test]
fn unwritable_indexes_stay_searchable() -> Result<()> {
    let config = EngineConfig {
        build_max_attempts: 2,
        build_backoff_ms: 1,
        ..small_threshold(EngineConfig::inline())
    };
    let storage = Arc::new(FailingAnnStorage::default());
    let index =
        IndexManager::create_standalone("faulty", hnsw_descriptor(), storage.clone(), config)?;
    index.put_vectors(grid_records(50))?;
    let segment = index.flush()?;

    let health = index.health();
    assert!(!health.healthy);
    assert!(health.pending_builds.is_empty());
    assert!(health.degraded_segments.is_empty());
    assert_eq!(health.unpersisted_segments.len(), 1);
    assert_eq!(Some(health.unpersisted_segments[0].segment_id), segment);
    assert_eq!(health.unpersisted_segments[0].attempts, 2);
    assert!(health.unpersisted_segments[0].last_error.contains("injected failure"));

    let stats = index.stats();
    assert_eq!(stats.indexed_segments, 1);
    assert_eq!(stats.unpersisted_segments, 1);
    assert_eq!(stats.degraded_segments, 0);
    assert_eq!(index.build_pending(), 0);
    assert!(storage.inner.list("segments/")?.iter().all(|name| !name.ends_with(".ann")));

    let response = index.query(&QueryRequest::new(vec![0.1, 0.2], 2))?;
    assert_eq!(response.keys(), vec!["k000", "k010"]);
    assert_eq!(response.stats.ann_searches, 1);
    Ok(())
}

#[test]
fn dropping_an_index_discards_its_queued_work() -> Result<()> {
    let scheduler = Arc::new(BuildScheduler::new(1)?);
    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    scheduler.submit(move || {
        let _ = gate.recv();
    });

    let storage = Arc::new(MemoryStorage::new());
    let config = EngineConfig {
        flush_max_records: 50,
        ..small_threshold(EngineConfig::default())
    };
    let index =
        IndexManager::create("doomed", hnsw_descriptor(), storage.clone(), config, scheduler)?;
    index.put_vectors(grid_records(40))?;
    index.flush()?;
    index.put_vectors(grid_records(100).split_off(40))?;
    assert_eq!(index.stats().pending_builds, 1);
    assert_eq!(index.state(), IndexState::Flushing);

    index.destroy()?;
    assert_eq!(storage.object_count(), 0);

    drop(release);
    assert!(index.wait_for_builds(Some(Duration::from_secs(30))));
    assert_eq!(storage.object_count(), 0);
    assert_eq!(index.stats().pending_builds, 0);
    assert_eq!(index.stats().indexed_segments, 0);
    Ok(())
}

#[test]
fn dropped_index_rejects_further_requests() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let registry = IndexRegistry::new(storage.clone(), EngineConfig::inline())?;
    registry.create_index("gone", IndexDescriptor::flat(2, DistanceMetric::Euclidean))?;
    registry.put_vectors("gone", grid_records(5))?;
    registry.flush("gone")?;

    registry.delete_index("gone")?;
    let missing = registry.query("gone", &QueryRequest::new(vec![0.0, 0.0], 1));
    assert!(matches!(missing, Err(QuiverError::NotFound(_))));
    assert!(storage.list("indexes/gone/")?.is_empty());

    registry.create_index("gone", IndexDescriptor::flat(3, DistanceMetric::Cosine))?;
    assert_eq!(registry.stats("gone")?.vector_count, 0);
    Ok(())
}
