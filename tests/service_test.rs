use std::sync::Arc;
use std::time::Duration;

use quiver::error::QuiverError;
use quiver::storage::memory::MemoryStorage;
use quiver::vector::core::distance::DistanceMetric;
use quiver::vector::core::record::VectorRecord;
use quiver::vector::engine::config::EngineConfig;
use quiver::vector::engine::cursor::ListVectorsRequest;
use quiver::vector::engine::registry::IndexRegistry;
use quiver::vector::engine::service::VectorService;
use quiver::vector::filter::FilterExpr;
use quiver::vector::index::config::{HnswParams, IndexDescriptor};
use quiver::vector::search::QueryRequest;

fn service(config: EngineConfig) -> VectorService {
    let registry = IndexRegistry::new(Arc::new(MemoryStorage::new()), config).unwrap();
    VectorService::new(Arc::new(registry))
}

fn ring(n: usize) -> Vec<VectorRecord> {
    (0..n)
        .map(|i| {
            let angle = i as f32 / n as f32 * std::f32::consts::TAU;
            VectorRecord::new(format!("p{i:03}"), vec![angle.cos(), angle.sin(), 0.5])
                .with_field("half", if i < n / 2 { "upper" } else { "lower" })
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_see_consistent_results() {
    let config = EngineConfig {
        flat_threshold: 32,
        ..EngineConfig::default()
    };
    let service = Arc::new(service(config));
    service
        .create_index(
            "ring",
            IndexDescriptor::hnsw(3, DistanceMetric::Cosine, HnswParams::default()),
        )
        .await
        .unwrap();
    service.put_vectors("ring", ring(200)).await.unwrap();
    service.flush("ring").await.unwrap();
    assert!(service.registry().wait_idle(Some(Duration::from_secs(30))));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let request = QueryRequest::new(vec![1.0, 0.0, 0.5], 5)
                .with_filter(FilterExpr::equals("half", "upper"));
            service.query("ring", request).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        results.push(response.keys().into_iter().map(str::to_string).collect::<Vec<_>>());
    }
    assert_eq!(results[0].len(), 5);
    assert_eq!(results[0][0], "p000");
    assert!(results.iter().all(|keys| keys == &results[0]));
    assert_eq!(service.stats("ring").await.unwrap().indexed_segments, 1);
}

#[tokio::test]
async fn listing_and_fetching_through_the_service() {
    let service = service(EngineConfig::inline());
    service
        .create_index("ring", IndexDescriptor::flat(3, DistanceMetric::Euclidean))
        .await
        .unwrap();
    service.put_vectors("ring", ring(12)).await.unwrap();

    let page = service
        .list_vectors("ring", ListVectorsRequest::new().with_page_size(5).with_vectors(true))
        .await
        .unwrap();
    assert_eq!(page.vectors.len(), 5);
    assert!(page.vectors.iter().all(|entry| entry.vector.is_some()));
    assert!(page.next_cursor.is_some());

    let entries = service
        .get_vectors("ring", vec!["p003".to_string(), "nope".to_string()], false, true)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "p003");
    assert!(entries[0].vector.is_none());

    let indexes = service.list_indexes().await.unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].name, "ring");

    service.delete_index("ring").await.unwrap();
    let err = service.stats("ring").await.unwrap_err();
    assert!(matches!(err, QuiverError::NotFound(_)));
}

#[tokio::test]
async fn validation_errors_cross_the_blocking_boundary() {
    let service = service(EngineConfig::inline());
    service
        .create_index("small", IndexDescriptor::flat(2, DistanceMetric::Dot))
        .await
        .unwrap();

    let err = service
        .put_vectors("small", vec![VectorRecord::new("x", vec![1.0])])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ValidationException");

    let err = service
        .query("small", QueryRequest::new(vec![1.0, 0.0], 0))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = service
        .create_index("small", IndexDescriptor::flat(2, DistanceMetric::Dot))
        .await
        .unwrap_err();
    assert!(matches!(err, QuiverError::AlreadyExists(_)));
}
