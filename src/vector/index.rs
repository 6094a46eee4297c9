//! Approximate nearest neighbor backends.
//!
//! Every backend answers the same question: given a [`VectorSource`] (the
//! positional vectors of one segment), a query and `k`, return up to `k`
//! offsets ordered by ascending distance. Backends never own the vectors they
//! index; a built structure only stores offsets into the segment it was built
//! from, so it can be persisted and swapped independently of the segment data.
//!
//! - [`flat::FlatIndex`]: exact scan, the filter is applied during the scan.
//! - [`hnsw::HnswIndex`]: layered proximity graph.
//! - [`ivf_pq::IvfPqIndex`]: coarse partitions with product-quantized residuals.
//!
//! Approximate backends post-filter their candidate list, so they may return
//! fewer than `k` results when the filter is selective. Callers that need `k`
//! results either overfetch or fall back to [`flat::FlatIndex`].

pub mod config;
pub mod flat;
pub mod hnsw;
pub mod ivf_pq;
pub mod kmeans;
pub mod quantization;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vector::core::distance::DistanceMetric;
use crate::vector::index::config::{BackendKind, BackendParams, IndexDescriptor};
use crate::vector::index::flat::FlatIndex;
use crate::vector::index::hnsw::HnswIndex;
use crate::vector::index::ivf_pq::IvfPqIndex;

/// Positional access to the vectors of one segment or buffer.
///
/// Offsets are dense in `0..len()`. Dead slots (overwritten or deleted
/// records) keep their vector and key so offsets never shift; visibility is
/// decided by the caller's filter.
pub trait VectorSource: Sync {
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector stored at `offset`.
    fn vector(&self, offset: u32) -> &[f32];

    /// Key stored at `offset`, used to break distance ties.
    fn key(&self, offset: u32) -> &str;
}

/// Predicate over segment offsets deciding which candidates may be returned.
pub type CandidateFilter<'a> = dyn Fn(u32) -> bool + Sync + 'a;

/// One search result: an offset into the searched source and its distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub offset: u32,
    pub distance: f32,
}

/// Common interface of all ANN backends.
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Whether results are guaranteed to be the true top-k.
    fn is_exact(&self) -> bool {
        self.kind().is_exact()
    }

    /// Number of offsets covered by the structure.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Search `source` for the `k` offsets nearest to `query`.
    ///
    /// Results are ordered by ascending distance with ties broken by
    /// ascending key, and only contain offsets accepted by `filter`.
    fn search(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        k: usize,
        filter: Option<&CandidateFilter<'_>>,
    ) -> Vec<Neighbor>;
}

/// A built ANN structure for one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnnIndex {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
    IvfPq(IvfPqIndex),
}

impl AnnIndex {
    /// Build the backend selected by `descriptor` over every offset of `source`.
    pub fn build(descriptor: &IndexDescriptor, source: &dyn VectorSource) -> Result<Self> {
        let metric = descriptor.metric;
        Ok(match &descriptor.backend {
            BackendParams::Flat => AnnIndex::Flat(FlatIndex::new(metric)),
            BackendParams::Hnsw(params) => {
                AnnIndex::Hnsw(HnswIndex::build(params, metric, source)?)
            }
            BackendParams::IvfPq(params) => {
                AnnIndex::IvfPq(IvfPqIndex::build(params, metric, source)?)
            }
        })
    }

    pub fn metric(&self) -> DistanceMetric {
        match self {
            AnnIndex::Flat(index) => index.metric(),
            AnnIndex::Hnsw(index) => index.metric(),
            AnnIndex::IvfPq(index) => index.metric(),
        }
    }

    /// Serialize for persistence next to the segment.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn inner(&self) -> &dyn VectorIndex {
        match self {
            AnnIndex::Flat(index) => index,
            AnnIndex::Hnsw(index) => index,
            AnnIndex::IvfPq(index) => index,
        }
    }
}

impl VectorIndex for AnnIndex {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn len(&self) -> usize {
        self.inner().len()
    }

    fn search(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        k: usize,
        filter: Option<&CandidateFilter<'_>>,
    ) -> Vec<Neighbor> {
        self.inner().search(source, query, k, filter)
    }
}

/// Total order used for every result list: distance, then key.
pub(crate) fn compare_neighbors(source: &dyn VectorSource, a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| source.key(a.offset).cmp(source.key(b.offset)))
}

/// Sort `neighbors` and keep the best `k`.
pub(crate) fn top_k(neighbors: &mut Vec<Neighbor>, source: &dyn VectorSource, k: usize) {
    if k == 0 {
        neighbors.clear();
        return;
    }
    if neighbors.len() > k {
        neighbors.select_nth_unstable_by(k - 1, |a, b| compare_neighbors(source, a, b));
        neighbors.truncate(k);
    }
    neighbors.sort_by(|a, b| compare_neighbors(source, a, b));
}

#[cfg(test)]
pub(crate) mod testing {
    use super::VectorSource;

    /// In-memory source used by backend tests.
    pub struct VecSource {
        pub dimension: usize,
        pub keys: Vec<String>,
        pub vectors: Vec<Vec<f32>>,
    }

    impl VecSource {
        pub fn new(vectors: Vec<Vec<f32>>) -> Self {
            let dimension = vectors.first().map(Vec::len).unwrap_or(0);
            let keys = (0..vectors.len()).map(|i| format!("k{i:05}")).collect();
            Self {
                dimension,
                keys,
                vectors,
            }
        }

        /// Deterministic pseudo-random vectors in `[-1, 1)`.
        pub fn random(n: usize, dimension: usize, seed: u64) -> Self {
            use rand::rngs::StdRng;
            use rand::{Rng, SeedableRng};

            let mut rng = StdRng::seed_from_u64(seed);
            let vectors = (0..n)
                .map(|_| (0..dimension).map(|_| rng.random_range(-1.0f32..1.0)).collect())
                .collect();
            Self::new(vectors)
        }
    }

    impl VectorSource for VecSource {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn len(&self) -> usize {
            self.vectors.len()
        }

        fn vector(&self, offset: u32) -> &[f32] {
            &self.vectors[offset as usize]
        }

        fn key(&self, offset: u32) -> &str {
            &self.keys[offset as usize]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::VecSource;
    use super::*;
    use crate::vector::index::config::{HnswParams, IvfPqParams};

    #[test]
    fn test_top_k_breaks_ties_by_key() {
        let source = VecSource::new(vec![vec![1.0], vec![1.0], vec![0.0]]);
        let mut neighbors = vec![
            Neighbor { offset: 1, distance: 1.0 },
            Neighbor { offset: 0, distance: 1.0 },
            Neighbor { offset: 2, distance: 0.5 },
        ];
        top_k(&mut neighbors, &source, 2);
        let offsets: Vec<u32> = neighbors.iter().map(|n| n.offset).collect();
        assert_eq!(offsets, vec![2, 0]);
    }

    #[test]
    fn test_build_and_persist_each_backend() {
        let source = VecSource::random(200, 8, 5);
        let query = source.vectors[17].clone();
        let descriptors = [
            IndexDescriptor::flat(8, DistanceMetric::Euclidean),
            IndexDescriptor::hnsw(8, DistanceMetric::Euclidean, HnswParams::default()),
            IndexDescriptor::ivf_pq(
                8,
                DistanceMetric::Euclidean,
                IvfPqParams {
                    n_partitions: 8,
                    n_probe: 8,
                    ..IvfPqParams::default()
                },
            ),
        ];

        for descriptor in &descriptors {
            let index = AnnIndex::build(descriptor, &source).unwrap();
            assert_eq!(index.kind(), descriptor.backend_kind());

            let restored = AnnIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
            let hits = restored.search(&source, &query, 3, None);
            assert_eq!(hits[0].offset, 17, "{} lost the exact match", index.kind());
            assert!(hits[0].distance.abs() < 1e-5);
        }
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(AnnIndex::from_bytes(&[0xff, 0x01]).is_err());
    }
}
