//! Per-source plan selection, fan-out and merge.
//!
//! Every source of a snapshot is searched independently (in parallel) with a
//! candidate filter combining the compiled metadata filter with visibility:
//! a slot is a candidate only if it is the live version of its key and no
//! later source masks that key. Buffers and segments without a built
//! structure are scanned exactly. Segments with an approximate structure are
//! searched with an overfetched `k`, and redone by flat scan when the
//! filtered yield falls short of `k`.

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use tracing::trace;

use crate::error::{QuiverError, Result};
use crate::vector::core::distance::DistanceMetric;
use crate::vector::filter::CompiledFilter;
use crate::vector::index::config::IndexDescriptor;
use crate::vector::index::flat::FlatIndex;
use crate::vector::index::{CandidateFilter, Neighbor, VectorIndex};
use crate::vector::search::request::{QueryHit, QueryRequest, QueryResponse, QueryStats};
use crate::vector::segment::RecordSource;
use crate::vector::segment::store::{SourceRef, StoreState, is_visible};

/// Tunables of the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Multiplier on `k` for approximate backends.
    pub overfetch_factor: usize,
    /// Live records sampled to estimate filter selectivity; 0 disables sampling.
    pub selectivity_sample: usize,
    pub max_top_k: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 3,
            selectivity_sample: 64,
            max_top_k: 1000,
        }
    }
}

/// Query execution for one logical index.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    config: PlannerConfig,
    metric: DistanceMetric,
    dimension: usize,
    non_filterable: AHashSet<String>,
}

struct SourceResult {
    position: usize,
    neighbors: Vec<Neighbor>,
    stats: QueryStats,
}

impl QueryPlanner {
    pub fn new(descriptor: &IndexDescriptor, config: PlannerConfig) -> Self {
        Self {
            config,
            metric: descriptor.metric,
            dimension: descriptor.dimension,
            non_filterable: descriptor.non_filterable_metadata_keys.iter().cloned().collect(),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Validate a request and compile its filter.
    pub fn prepare(&self, request: &QueryRequest) -> Result<CompiledFilter> {
        if request.top_k == 0 {
            return Err(QuiverError::validation("top_k must be at least 1"));
        }
        if request.top_k > self.config.max_top_k {
            return Err(QuiverError::validation(format!(
                "top_k must be at most {}, got {}",
                self.config.max_top_k, request.top_k
            )));
        }
        if request.vector.len() != self.dimension {
            return Err(QuiverError::dimension_mismatch(self.dimension, request.vector.len()));
        }
        if request.vector.iter().any(|v| !v.is_finite()) {
            return Err(QuiverError::validation("Query vector contains NaN or infinite values"));
        }

        let Some(filter) = &request.filter else {
            return Ok(CompiledFilter::always());
        };
        if let Some(key) = filter
            .referenced_keys()
            .into_iter()
            .find(|key| self.non_filterable.contains(*key))
        {
            return Err(QuiverError::invalid_filter(format!(
                "Metadata key '{key}' is not filterable"
            )));
        }
        CompiledFilter::compile(filter)
    }

    /// Run `request` against an immutable snapshot.
    pub fn execute(&self, snapshot: &StoreState, request: &QueryRequest) -> Result<QueryResponse> {
        let filter = self.prepare(request)?;
        let sources = snapshot.sources();
        let k = request.top_k;

        let results: Vec<SourceResult> = (0..sources.len())
            .into_par_iter()
            .map(|position| self.search_source(&sources, position, &request.vector, k, &filter))
            .collect();

        let mut stats = QueryStats::default();
        let mut best: AHashMap<&str, (usize, Neighbor)> = AHashMap::new();
        for result in &results {
            stats.merge(&result.stats);
            let records = sources[result.position].records();
            for neighbor in &result.neighbors {
                let key = records.key(neighbor.offset);
                match best.get(key) {
                    Some((position, _)) if *position > result.position => {}
                    _ => {
                        best.insert(key, (result.position, *neighbor));
                    }
                }
            }
        }

        let mut merged: Vec<(&str, usize, Neighbor)> = best
            .into_iter()
            .map(|(key, (position, neighbor))| (key, position, neighbor))
            .collect();
        merged.sort_by(|a, b| a.2.distance.total_cmp(&b.2.distance).then_with(|| a.0.cmp(b.0)));
        merged.truncate(k);

        let hits = merged
            .into_iter()
            .map(|(key, position, neighbor)| {
                let records = sources[position].records();
                QueryHit {
                    key: key.to_string(),
                    distance: neighbor.distance,
                    metadata: request
                        .include_metadata
                        .then(|| records.metadata(neighbor.offset).clone()),
                    vector: request
                        .include_vector
                        .then(|| records.vector(neighbor.offset).to_vec()),
                }
            })
            .collect();

        Ok(QueryResponse { hits, stats })
    }

    fn search_source(
        &self,
        sources: &[SourceRef<'_>],
        position: usize,
        query: &[f32],
        k: usize,
        filter: &CompiledFilter,
    ) -> SourceResult {
        let source = sources[position];
        let records = source.records();
        let mut stats = QueryStats::default();
        if records.is_empty() {
            return SourceResult {
                position,
                neighbors: Vec::new(),
                stats,
            };
        }
        stats.sources_searched = 1;

        let accept = |offset: u32| {
            is_visible(sources, position, offset) && filter.matches(records.metadata(offset))
        };
        let accept: &CandidateFilter<'_> = &accept;
        let flat = FlatIndex::new(self.metric);

        let index = source.index().filter(|index| !index.is_exact());
        let neighbors = match index {
            Some(index) if self.too_selective(records, filter) => {
                trace!(
                    "Segment {}: filter too selective for {}, scanning flat",
                    source.id(),
                    index.kind()
                );
                stats.selectivity_fallbacks = 1;
                stats.flat_scans = 1;
                flat.scan(records.vectors(), query, k, Some(accept))
            }
            Some(index) => {
                let widened = k.max(k.saturating_mul(self.config.overfetch_factor));
                let mut hits = index.search(records.vectors(), query, widened, Some(accept));
                stats.ann_searches = 1;
                let wanted = k.min(records.live_count());
                if hits.len() < wanted {
                    trace!(
                        "Segment {}: {} yielded {} of {wanted}, escalating to flat scan",
                        source.id(),
                        index.kind(),
                        hits.len()
                    );
                    stats.escalations = 1;
                    stats.flat_scans = 1;
                    hits = flat.scan(records.vectors(), query, k, Some(accept));
                } else {
                    hits.truncate(k);
                }
                hits
            }
            None => {
                stats.flat_scans = 1;
                flat.scan(records.vectors(), query, k, Some(accept))
            }
        };

        SourceResult {
            position,
            neighbors,
            stats,
        }
    }

    /// Estimate the fraction of live records accepted by `filter` from an even
    /// sample, and report whether it is below `1 / overfetch_factor`.
    fn too_selective(&self, records: &dyn RecordSource, filter: &CompiledFilter) -> bool {
        if filter.is_always() || self.config.selectivity_sample == 0 {
            return false;
        }
        let len = records.len();
        let step = len.div_ceil(self.config.selectivity_sample).max(1);
        let mut sampled = 0usize;
        let mut matched = 0usize;
        for offset in (0..len).step_by(step) {
            let offset = offset as u32;
            if !records.is_live(offset) {
                continue;
            }
            sampled += 1;
            if filter.matches(records.metadata(offset)) {
                matched += 1;
            }
        }
        if sampled == 0 {
            return false;
        }
        matched * self.config.overfetch_factor.max(1) < sampled
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::vector::core::record::VectorRecord;
    use crate::vector::filter::FilterExpr;
    use crate::vector::index::AnnIndex;
    use crate::vector::index::config::HnswParams;
    use crate::vector::segment::store::SegmentStore;

    fn flat_store() -> (IndexDescriptor, SegmentStore) {
        let descriptor = IndexDescriptor::flat(2, DistanceMetric::Euclidean);
        let store = SegmentStore::create(Arc::new(MemoryStorage::new()), 2).unwrap();
        (descriptor, store)
    }

    fn planner(descriptor: &IndexDescriptor) -> QueryPlanner {
        QueryPlanner::new(descriptor, PlannerConfig::default())
    }

    #[test]
    fn test_merges_buffer_and_segments() {
        let (descriptor, store) = flat_store();
        store.append(VectorRecord::new("a", vec![0.0, 0.0])).unwrap();
        store.append(VectorRecord::new("b", vec![1.0, 1.0])).unwrap();
        store.flush().unwrap();
        store.append(VectorRecord::new("c", vec![3.0, 3.0])).unwrap();

        let response = planner(&descriptor)
            .execute(&store.snapshot(), &QueryRequest::new(vec![0.0, 0.0], 2))
            .unwrap();
        assert_eq!(response.keys(), vec!["a", "b"]);
        assert!((response.hits[1].distance - 2.0f32.sqrt()).abs() < 1e-6);
        assert_eq!(response.stats.sources_searched, 2);
        assert_eq!(response.stats.flat_scans, 2);
    }

    #[test]
    fn test_newer_version_wins() {
        let (descriptor, store) = flat_store();
        store.append(VectorRecord::new("a", vec![0.0, 0.0])).unwrap();
        store.flush().unwrap();
        store.append(VectorRecord::new("a", vec![5.0, 5.0])).unwrap();

        let response = planner(&descriptor)
            .execute(&store.snapshot(), &QueryRequest::new(vec![0.0, 0.0], 5))
            .unwrap();
        assert_eq!(response.hits.len(), 1);
        assert!(response.hits[0].distance > 7.0);
    }

    #[test]
    fn test_rejects_invalid_requests() {
        let descriptor =
            IndexDescriptor::flat(2, DistanceMetric::Euclidean).with_non_filterable_keys(["body"]);
        let planner = planner(&descriptor);

        let zero_k = planner.prepare(&QueryRequest::new(vec![0.0, 0.0], 0));
        assert!(zero_k.unwrap_err().is_validation());
        assert!(planner.prepare(&QueryRequest::new(vec![0.0, 0.0], 1001)).is_err());
        assert!(matches!(
            planner.prepare(&QueryRequest::new(vec![0.0], 1)),
            Err(QuiverError::DimensionMismatch { .. })
        ));
        assert!(planner.prepare(&QueryRequest::new(vec![f32::NAN, 0.0], 1)).is_err());

        let filtered =
            QueryRequest::new(vec![0.0, 0.0], 1).with_filter(FilterExpr::equals("body", "x"));
        assert!(matches!(planner.prepare(&filtered), Err(QuiverError::InvalidFilter(_))));
    }

    #[test]
    fn test_escalates_when_filtered_yield_is_short() {
        let descriptor = IndexDescriptor::hnsw(
            2,
            DistanceMetric::Euclidean,
            HnswParams {
                ef_search: 10,
                ..HnswParams::default()
            },
        );
        let store = SegmentStore::create(Arc::new(MemoryStorage::new()), 2).unwrap();
        for i in 0..300 {
            let tag = if i == 299 { "rare" } else { "common" };
            let record = VectorRecord::new(format!("k{i:03}"), vec![i as f32, 0.0]);
            store.append(record.with_field("tag", tag)).unwrap();
        }
        let id = store.flush().unwrap().unwrap();
        let segment = store.snapshot().segment(id).unwrap().segment.clone();
        let index = AnnIndex::build(&descriptor, segment.as_ref()).unwrap();
        assert!(store.install_index(id, Arc::new(index)));

        let config = PlannerConfig {
            selectivity_sample: 0,
            ..PlannerConfig::default()
        };
        let planner = QueryPlanner::new(&descriptor, config);
        let request =
            QueryRequest::new(vec![0.0, 0.0], 3).with_filter(FilterExpr::equals("tag", "rare"));
        let response = planner.execute(&store.snapshot(), &request).unwrap();

        assert_eq!(response.keys(), vec!["k299"]);
        assert_eq!(response.stats.ann_searches, 1);
        assert_eq!(response.stats.escalations, 1);
    }

    #[test]
    fn test_selectivity_sampling_skips_ann() {
        let descriptor = IndexDescriptor::hnsw(2, DistanceMetric::Euclidean, HnswParams::default());
        let store = SegmentStore::create(Arc::new(MemoryStorage::new()), 2).unwrap();
        for i in 0..200 {
            let tag = if i % 50 == 0 { "x" } else { "y" };
            let record = VectorRecord::new(format!("k{i:03}"), vec![i as f32, 1.0]);
            store.append(record.with_field("tag", tag)).unwrap();
        }
        let id = store.flush().unwrap().unwrap();
        let segment = store.snapshot().segment(id).unwrap().segment.clone();
        let index = AnnIndex::build(&descriptor, segment.as_ref()).unwrap();
        assert!(store.install_index(id, Arc::new(index)));

        let request =
            QueryRequest::new(vec![0.0, 1.0], 10).with_filter(FilterExpr::equals("tag", "x"));
        let response = planner(&descriptor).execute(&store.snapshot(), &request).unwrap();
        assert_eq!(response.keys(), vec!["k000", "k050", "k100", "k150"]);
        assert_eq!(response.stats.selectivity_fallbacks, 1);
        assert_eq!(response.stats.ann_searches, 0);
    }

    #[test]
    fn test_include_flags() {
        let (descriptor, store) = flat_store();
        store
            .append(VectorRecord::new("a", vec![1.0, 2.0]).with_field("n", 1))
            .unwrap();
        let request = QueryRequest::new(vec![0.0, 0.0], 1).with_vectors(true).with_metadata(false);
        let response = planner(&descriptor).execute(&store.snapshot(), &request).unwrap();
        assert_eq!(response.hits[0].vector, Some(vec![1.0, 2.0]));
        assert_eq!(response.hits[0].metadata, None);
    }
}
