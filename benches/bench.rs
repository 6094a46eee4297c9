//! Criterion benchmarks for the Quiver engine.
//!
//! Covers the distance kernels, each search backend over a single sealed
//! segment, and the planner with filters of different selectivity.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use quiver::storage::memory::MemoryStorage;
use quiver::vector::core::distance::DistanceMetric;
use quiver::vector::core::record::VectorRecord;
use quiver::vector::engine::IndexManager;
use quiver::vector::engine::config::EngineConfig;
use quiver::vector::filter::FilterExpr;
use quiver::vector::index::config::{HnswParams, IndexDescriptor, IvfPqParams};
use quiver::vector::search::QueryRequest;
use rand::{Rng, SeedableRng, rngs::StdRng};

const DIMENSION: usize = 64;

fn generate_records(count: usize, dimension: usize) -> Vec<VectorRecord> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count)
        .map(|i| {
            let vector = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
            VectorRecord::new(format!("doc-{i:06}"), vector)
                .with_field("bucket", (i % 100) as i64)
                .with_field("even", i % 2 == 0)
        })
        .collect()
}

fn build_index(descriptor: IndexDescriptor, records: &[VectorRecord]) -> IndexManager {
    let config = EngineConfig {
        flat_threshold: 256,
        ..EngineConfig::inline()
    };
    let storage = Arc::new(MemoryStorage::new());
    let index = IndexManager::create_standalone("bench", descriptor, storage, config).unwrap();
    for chunk in records.chunks(500) {
        index.put_vectors(chunk.to_vec()).unwrap();
    }
    index.flush().unwrap();
    index
}

fn bench_distance(c: &mut Criterion) {
    let mut group = c.benchmark_group("distance");
    let records = generate_records(1000, DIMENSION);
    let query = records[0].vector.clone();
    let vectors: Vec<&[f32]> = records.iter().map(|record| record.vector.as_slice()).collect();

    for metric in [DistanceMetric::Euclidean, DistanceMetric::Cosine, DistanceMetric::Dot] {
        group.throughput(Throughput::Elements(vectors.len() as u64));
        group.bench_function(BenchmarkId::from_parameter(metric.name()), |b| {
            b.iter(|| {
                let total: f32 = vectors
                    .iter()
                    .map(|vector| metric.distance_unchecked(black_box(&query), vector))
                    .sum();
                black_box(total)
            })
        });
    }

    group.finish();
}

fn bench_backends(c: &mut Criterion) {
    let mut group = c.benchmark_group("backend_query");
    group.sample_size(20);

    let records = generate_records(5000, DIMENSION);
    let vector = generate_records(1, DIMENSION).remove(0).vector;
    let query = QueryRequest::new(vector, 10).with_metadata(false);
    let backends = [
        ("flat", IndexDescriptor::flat(DIMENSION, DistanceMetric::Euclidean)),
        (
            "hnsw",
            IndexDescriptor::hnsw(DIMENSION, DistanceMetric::Euclidean, HnswParams::default()),
        ),
        (
            "ivf_pq",
            IndexDescriptor::ivf_pq(DIMENSION, DistanceMetric::Euclidean, IvfPqParams::default()),
        ),
    ];

    for (name, descriptor) in backends {
        let index = build_index(descriptor, &records);
        group.bench_function(name, |b| {
            b.iter(|| black_box(index.query(black_box(&query)).unwrap()))
        });
    }

    group.finish();
}

fn bench_filtered_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_query");
    group.sample_size(20);

    let records = generate_records(5000, DIMENSION);
    let index = build_index(
        IndexDescriptor::hnsw(DIMENSION, DistanceMetric::Euclidean, HnswParams::default()),
        &records,
    );
    let vector = records[42].vector.clone();
    let filters = [
        ("half", FilterExpr::equals("even", true)),
        ("one_percent", FilterExpr::equals("bucket", 17)),
        ("range", FilterExpr::less_than("bucket", 10)),
    ];

    for (name, filter) in filters {
        let request = QueryRequest::new(vector.clone(), 10).with_filter(filter);
        group.bench_with_input(BenchmarkId::from_parameter(name), &request, |b, request| {
            b.iter(|| black_box(index.query(request).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_distance, bench_backends, bench_filtered_queries);
criterion_main!(benches);
