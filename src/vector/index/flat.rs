//! Exact brute-force backend.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::vector::core::distance::DistanceMetric;
use crate::vector::index::config::BackendKind;
use crate::vector::index::{CandidateFilter, Neighbor, VectorIndex, VectorSource, top_k};

/// Sources with at least this many slots are scanned in parallel.
const PARALLEL_SCAN_THRESHOLD: usize = 2048;

/// Scans every offset of the source. Holds no per-segment state, so building
/// one is free and it is always available as the fallback path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    metric: DistanceMetric,
}

impl FlatIndex {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Exact top-k over the offsets accepted by `filter`.
    pub fn scan(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        k: usize,
        filter: Option<&CandidateFilter<'_>>,
    ) -> Vec<Neighbor> {
        let len = source.len();
        if k == 0 || len == 0 {
            return Vec::new();
        }

        let metric = self.metric;
        let score = |offset: u32| -> Option<Neighbor> {
            if let Some(accept) = filter {
                if !accept(offset) {
                    return None;
                }
            }
            Some(Neighbor {
                offset,
                distance: metric.distance_unchecked(query, source.vector(offset)),
            })
        };

        let mut scored: Vec<Neighbor> = if len >= PARALLEL_SCAN_THRESHOLD {
            (0..len as u32).into_par_iter().filter_map(score).collect()
        } else {
            (0..len as u32).filter_map(score).collect()
        };

        top_k(&mut scored, source, k);
        scored
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    fn len(&self) -> usize {
        0
    }

    fn search(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        k: usize,
        filter: Option<&CandidateFilter<'_>>,
    ) -> Vec<Neighbor> {
        self.scan(source, query, k, filter)
    }
}
