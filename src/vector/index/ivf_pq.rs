//! IVF-PQ backend: inverted file over k-means partitions with
//! product-quantized residuals.
//!
//! Build clusters the segment into `n_partitions` coarse partitions, then
//! encodes each vector's residual to its partition centroid with a product
//! quantizer. A query probes the `n_probe` nearest partitions, ranks their
//! members by asymmetric (table lookup) distance, and rescores a shortlist
//! exactly against the segment's vectors. The filter is applied while the
//! probed lists are scanned, so records outside the probed partitions are
//! never returned.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::util::simd;
use crate::vector::core::distance::DistanceMetric;
use crate::vector::index::config::{BackendKind, IvfPqParams};
use crate::vector::index::kmeans::{self, KMeansConfig};
use crate::vector::index::quantization::ProductQuantizer;
use crate::vector::index::{CandidateFilter, Neighbor, VectorIndex, VectorSource, top_k};

/// Shortlist size per requested result before exact rescoring.
const RERANK_FACTOR: usize = 4;

/// Upper bound on vectors used to train the quantizer codebooks.
const TRAINING_SAMPLE: usize = 16_384;

/// Members of one partition, with their codes stored contiguously.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InvertedList {
    offsets: Vec<u32>,
    codes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfPqIndex {
    params: IvfPqParams,
    metric: DistanceMetric,
    dimension: usize,
    centroids: Vec<Vec<f32>>,
    quantizer: Option<ProductQuantizer>,
    lists: Vec<InvertedList>,
    len: usize,
}

impl IvfPqIndex {
    /// Train partitions and codebooks over every offset of `source`.
    pub fn build(
        params: &IvfPqParams,
        metric: DistanceMetric,
        source: &dyn VectorSource,
    ) -> Result<Self> {
        let dimension = source.dimension();
        params.validate(dimension)?;
        let len = source.len();
        if len > u32::MAX as usize {
            return Err(QuiverError::build(format!("Segment too large for IVF-PQ: {len} vectors")));
        }

        let mut index = Self {
            params: params.clone(),
            metric,
            dimension,
            centroids: Vec::new(),
            quantizer: None,
            lists: Vec::new(),
            len,
        };
        if len == 0 {
            return Ok(index);
        }

        let prepared: Vec<Vec<f32>> = (0..len as u32)
            .into_par_iter()
            .map(|offset| prepare(metric, source.vector(offset)))
            .collect();
        let refs: Vec<&[f32]> = prepared.iter().map(Vec::as_slice).collect();

        let partitions = KMeansConfig::new(
            params.n_partitions.min(len),
            params.training_iterations,
            params.seed,
        );
        let centroids = kmeans::train(&refs, &partitions)?;
        let assignments = kmeans::assign(&refs, &centroids);

        let residuals: Vec<Vec<f32>> = prepared
            .par_iter()
            .zip(assignments.par_iter())
            .map(|(vector, &partition)| residual(vector, &centroids[partition]))
            .collect();

        let stride = residuals.len().div_ceil(TRAINING_SAMPLE);
        let training: Vec<Vec<f32>> = residuals.iter().step_by(stride).cloned().collect();
        let quantizer = ProductQuantizer::train(
            &training,
            params.resolved_subquantizers(dimension),
            params.bits,
            params.training_iterations,
            params.seed.wrapping_add(1),
        )?;

        let mut lists = vec![InvertedList::default(); centroids.len()];
        for (offset, (vector, &partition)) in residuals.iter().zip(&assignments).enumerate() {
            let list = &mut lists[partition];
            list.offsets.push(offset as u32);
            list.codes.extend(quantizer.encode(vector));
        }

        index.centroids = centroids;
        index.quantizer = Some(quantizer);
        index.lists = lists;
        Ok(index)
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Partitions to probe for `query`, nearest first.
    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let mut scored: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(partition, centroid)| (simd::squared_l2(query, centroid), partition))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(self.params.n_probe.min(self.centroids.len()))
            .map(|(_, partition)| partition)
            .collect()
    }
}

/// Vectors are clustered in the space the metric ranks in.
fn prepare(metric: DistanceMetric, vector: &[f32]) -> Vec<f32> {
    match metric {
        DistanceMetric::Cosine => simd::normalized(vector),
        DistanceMetric::Euclidean | DistanceMetric::Dot => vector.to_vec(),
    }
}

fn residual(vector: &[f32], centroid: &[f32]) -> Vec<f32> {
    vector.iter().zip(centroid).map(|(v, c)| v - c).collect()
}

impl VectorIndex for IvfPqIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::IvfPq
    }

    fn len(&self) -> usize {
        self.len
    }

    fn search(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        k: usize,
        filter: Option<&CandidateFilter<'_>>,
    ) -> Vec<Neighbor> {
        let Some(quantizer) = &self.quantizer else {
            return Vec::new();
        };
        if k == 0 || source.len() != self.len || query.len() != self.dimension {
            return Vec::new();
        }

        let prepared = prepare(self.metric, query);
        let code_size = quantizer.code_size();
        let mut shortlist: Vec<Neighbor> = Vec::new();

        for partition in self.probe_order(&prepared) {
            let list = &self.lists[partition];
            let table = quantizer.distance_table(&residual(&prepared, &self.centroids[partition]));
            for (&offset, codes) in list.offsets.iter().zip(list.codes.chunks_exact(code_size)) {
                if filter.is_some_and(|accept| !accept(offset)) {
                    continue;
                }
                shortlist.push(Neighbor {
                    offset,
                    distance: table.distance(codes),
                });
            }
        }

        let rerank = k.saturating_mul(RERANK_FACTOR);
        if shortlist.len() > rerank {
            shortlist.select_nth_unstable_by(rerank - 1, |a, b| {
                a.distance.total_cmp(&b.distance).then(a.offset.cmp(&b.offset))
            });
            shortlist.truncate(rerank);
        }

        let mut neighbors: Vec<Neighbor> = shortlist
            .into_iter()
            .map(|candidate| Neighbor {
                offset: candidate.offset,
                distance: self
                    .metric
                    .distance_unchecked(query, source.vector(candidate.offset)),
            })
            .collect();
        top_k(&mut neighbors, source, k);
        neighbors
    }
}
