//! Async facade over an [`IndexRegistry`].
//!
//! Engine calls are CPU-bound and may block on storage, so each one runs on
//! tokio's blocking pool. A query that outlives its timeout is reported as
//! [`QuiverError::OperationCancelled`]; it has no side effects, so its result
//! is simply dropped when the blocking task finishes.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{QuiverError, Result};
use crate::vector::core::record::{SegmentId, VectorRecord};
use crate::vector::engine::IndexStats;
use crate::vector::engine::cursor::{ListVectorsPage, ListVectorsRequest, VectorEntry};
use crate::vector::engine::registry::{IndexRegistry, IndexSummary};
use crate::vector::index::config::IndexDescriptor;
use crate::vector::search::{QueryRequest, QueryResponse};
use crate::vector::segment::store::CompactionOutcome;

#[derive(Debug, Clone)]
pub struct VectorService {
    registry: Arc<IndexRegistry>,
    query_timeout: Option<Duration>,
}

impl VectorService {
    /// Queries are bounded by the registry's `query_timeout_ms`, if set.
    pub fn new(registry: Arc<IndexRegistry>) -> Self {
        let query_timeout = registry.config().query_timeout_ms.map(Duration::from_millis);
        Self {
            registry,
            query_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&IndexRegistry) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || f(&registry))
            .await
            .map_err(|e| QuiverError::internal(format!("{operation} task failed: {e}")))?
    }

    pub async fn create_index(
        &self,
        name: &str,
        descriptor: IndexDescriptor,
    ) -> Result<IndexSummary> {
        let name = name.to_string();
        self.run("create_index", move |registry| {
            registry.create_index(&name, descriptor)?;
            registry
                .list_indexes()
                .into_iter()
                .find(|summary| summary.name == name)
                .ok_or_else(|| QuiverError::not_found(format!("Index {name}")))
        })
        .await
    }

    pub async fn delete_index(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.run("delete_index", move |registry| registry.delete_index(&name)).await
    }

    pub async fn list_indexes(&self) -> Result<Vec<IndexSummary>> {
        self.run("list_indexes", |registry| Ok(registry.list_indexes())).await
    }

    pub async fn put_vectors(&self, name: &str, records: Vec<VectorRecord>) -> Result<()> {
        let name = name.to_string();
        self.run("put_vectors", move |registry| registry.put_vectors(&name, records)).await
    }

    pub async fn delete_vectors(&self, name: &str, keys: Vec<String>) -> Result<usize> {
        let name = name.to_string();
        self.run("delete_vectors", move |registry| registry.delete_vectors(&name, &keys)).await
    }

    pub async fn get_vectors(
        &self,
        name: &str,
        keys: Vec<String>,
        include_vector: bool,
        include_metadata: bool,
    ) -> Result<Vec<VectorEntry>> {
        let name = name.to_string();
        self.run("get_vectors", move |registry| {
            registry.get_vectors(&name, &keys, include_vector, include_metadata)
        })
        .await
    }

    /// Run a query, bounded by the configured timeout if any.
    pub async fn query(&self, name: &str, request: QueryRequest) -> Result<QueryResponse> {
        match self.query_timeout {
            Some(timeout) => self.query_with_timeout(name, request, timeout).await,
            None => self.query_unbounded(name, request).await,
        }
    }

    pub async fn query_with_timeout(
        &self,
        name: &str,
        request: QueryRequest,
        timeout: Duration,
    ) -> Result<QueryResponse> {
        match tokio::time::timeout(timeout, self.query_unbounded(name, request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Query on {name} abandoned after {timeout:?}");
                Err(QuiverError::cancelled(format!("Query on {name} exceeded {timeout:?}")))
            }
        }
    }

    async fn query_unbounded(&self, name: &str, request: QueryRequest) -> Result<QueryResponse> {
        let name = name.to_string();
        self.run("query", move |registry| registry.query(&name, &request)).await
    }

    pub async fn list_vectors(
        &self,
        name: &str,
        request: ListVectorsRequest,
    ) -> Result<ListVectorsPage> {
        let name = name.to_string();
        self.run("list_vectors", move |registry| registry.list_vectors(&name, &request)).await
    }

    pub async fn flush(&self, name: &str) -> Result<Option<SegmentId>> {
        let name = name.to_string();
        self.run("flush", move |registry| registry.flush(&name)).await
    }

    pub async fn compact(&self, name: &str) -> Result<CompactionOutcome> {
        let name = name.to_string();
        self.run("compact", move |registry| registry.compact(&name)).await
    }

    pub async fn stats(&self, name: &str) -> Result<IndexStats> {
        let name = name.to_string();
        self.run("stats", move |registry| registry.stats(&name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::vector::core::distance::DistanceMetric;
    use crate::vector::engine::config::EngineConfig;

    fn service_with(config: EngineConfig) -> VectorService {
        let registry = IndexRegistry::new(Arc::new(MemoryStorage::new()), config).unwrap();
        VectorService::new(Arc::new(registry))
    }

    fn service() -> VectorService {
        service_with(EngineConfig::inline())
    }

    #[tokio::test]
    async fn test_round_trip_through_blocking_pool() {
        let service = service();
        let summary = service
            .create_index("idx", IndexDescriptor::flat(2, DistanceMetric::Euclidean))
            .await
            .unwrap();
        assert_eq!(summary.dimension, 2);

        service
            .put_vectors(
                "idx",
                vec![
                    VectorRecord::new("a", vec![0.0, 0.0]),
                    VectorRecord::new("b", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let response = service
            .query("idx", QueryRequest::new(vec![1.0, 1.0], 1))
            .await
            .unwrap();
        assert_eq!(response.keys(), vec!["b"]);

        assert_eq!(service.delete_vectors("idx", vec!["b".to_string()]).await.unwrap(), 1);
        assert_eq!(service.stats("idx").await.unwrap().vector_count, 1);
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let service = service();
        let err = service
            .query("missing", QueryRequest::new(vec![0.0], 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ResourceNotFoundException");
    }

    #[test]
    fn test_expired_query_is_cancelled() {
        let service = service_with(EngineConfig {
            query_timeout_ms: Some(0),
            ..EngineConfig::inline()
        });
        tokio_test::block_on(async {
            service
                .create_index("slow", IndexDescriptor::flat(32, DistanceMetric::Cosine))
                .await
                .unwrap();
            for batch in 0..10 {
                let records = (0..500)
                    .map(|i| {
                        let value = (i + batch) as f32 + 1.0;
                        VectorRecord::new(format!("k{batch}-{i}"), vec![value; 32])
                    })
                    .collect();
                service.put_vectors("slow", records).await.unwrap();
            }

            let err = service
                .query("slow", QueryRequest::new(vec![1.0; 32], 10))
                .await
                .unwrap_err();
            assert!(matches!(err, QuiverError::OperationCancelled(_)));
        });
    }
}
