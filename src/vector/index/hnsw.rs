//! HNSW (Hierarchical Navigable Small World) backend.
//!
//! Nodes are segment offsets. Each node is assigned a random top layer drawn
//! from an exponential distribution (`ml = 1 / ln(m)`), and is linked to its
//! nearest neighbors on every layer up to that one. Search descends greedily
//! through the upper layers and runs a best-first beam of width `ef_search`
//! on layer 0. Level assignment is seeded, so a given segment always builds
//! the same graph.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use bit_vec::BitVec;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::vector::core::distance::DistanceMetric;
use crate::vector::index::config::{BackendKind, HnswParams};
use crate::vector::index::{CandidateFilter, Neighbor, VectorIndex, VectorSource, top_k};

/// Layered proximity graph over the offsets of one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    params: HnswParams,
    metric: DistanceMetric,
    /// Node on the highest layer; `None` only for an empty graph.
    entry_point: Option<u32>,
    top_level: usize,
    /// `links[node][layer]` lists the neighbors of `node` on `layer`.
    links: Vec<Vec<Vec<u32>>>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Visited marks that can be reset in time proportional to what was touched.
struct VisitedSet {
    bits: BitVec,
    touched: Vec<u32>,
}

impl VisitedSet {
    fn new(len: usize) -> Self {
        Self {
            bits: BitVec::from_elem(len, false),
            touched: Vec::new(),
        }
    }

    /// Mark `id`, returning false if it was already marked.
    fn insert(&mut self, id: u32) -> bool {
        let index = id as usize;
        if self.bits.get(index).unwrap_or(true) {
            return false;
        }
        self.bits.set(index, true);
        self.touched.push(id);
        true
    }

    fn clear(&mut self) {
        for id in self.touched.drain(..) {
            self.bits.set(id as usize, false);
        }
    }
}

impl HnswIndex {
    /// Build a graph over every offset of `source`.
    pub fn build(
        params: &HnswParams,
        metric: DistanceMetric,
        source: &dyn VectorSource,
    ) -> Result<Self> {
        params.validate()?;
        let len = source.len();
        if len > u32::MAX as usize {
            return Err(QuiverError::build(format!("Segment too large for HNSW: {len} vectors")));
        }

        let mut index = Self {
            params: params.clone(),
            metric,
            entry_point: None,
            top_level: 0,
            links: Vec::with_capacity(len),
        };

        let mut rng = StdRng::seed_from_u64(params.seed);
        let level_mult = 1.0 / (params.m as f64).ln();
        let mut visited = VisitedSet::new(len);

        for node in 0..len as u32 {
            let level = random_level(&mut rng, level_mult, params.max_level);
            index.insert(source, node, level, &mut visited);
        }

        Ok(index)
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 { self.params.m * 2 } else { self.params.m }
    }

    fn neighbors(&self, node: u32, layer: usize) -> &[u32] {
        self.links
            .get(node as usize)
            .and_then(|layers| layers.get(layer))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn distance(&self, source: &dyn VectorSource, query: &[f32], node: u32) -> f32 {
        self.metric.distance_unchecked(query, source.vector(node))
    }

    fn insert(
        &mut self,
        source: &dyn VectorSource,
        node: u32,
        level: usize,
        visited: &mut VisitedSet,
    ) {
        self.links.push(vec![Vec::new(); level + 1]);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(node);
            self.top_level = level;
            return;
        };

        let query = source.vector(node);
        let mut nearest = Candidate {
            distance: self.distance(source, query, entry),
            id: entry,
        };
        for layer in (level + 1..=self.top_level).rev() {
            nearest = self.greedy_closest(source, query, nearest, layer);
        }

        let mut entries = vec![nearest];
        for layer in (0..=level.min(self.top_level)).rev() {
            let ef = self.params.ef_construction;
            let found = self.search_layer(source, query, &entries, ef, layer, visited);
            visited.clear();

            let selected = self.select_neighbors(source, &found, self.params.m);
            for &neighbor in &selected {
                self.links[neighbor as usize][layer].push(node);
                if self.links[neighbor as usize][layer].len() > self.max_connections(layer) {
                    self.shrink(source, neighbor, layer);
                }
            }
            self.links[node as usize][layer] = selected;
            entries = found;
        }

        if level > self.top_level {
            self.top_level = level;
            self.entry_point = Some(node);
        }
    }

    /// Re-select the links of `node` on `layer` after it overflowed.
    fn shrink(&mut self, source: &dyn VectorSource, node: u32, layer: usize) {
        let base = source.vector(node);
        let mut scored: Vec<Candidate> = self
            .neighbors(node, layer)
            .iter()
            .map(|&id| Candidate {
                distance: self.distance(source, base, id),
                id,
            })
            .collect();
        scored.sort();
        let kept = self.select_neighbors(source, &scored, self.max_connections(layer));
        self.links[node as usize][layer] = kept;
    }

    /// Neighbor selection heuristic: prefer candidates closer to the base node
    /// than to any already selected neighbor, then fill up with the pruned ones.
    fn select_neighbors(
        &self,
        source: &dyn VectorSource,
        candidates: &[Candidate],
        m: usize,
    ) -> Vec<u32> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        let mut pruned = Vec::new();

        for &candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let vector = source.vector(candidate.id);
            let diverse = selected
                .iter()
                .all(|kept| self.distance(source, vector, kept.id) > candidate.distance);
            if diverse {
                selected.push(candidate);
            } else {
                pruned.push(candidate);
            }
        }

        for candidate in pruned {
            if selected.len() >= m {
                break;
            }
            selected.push(candidate);
        }

        selected.into_iter().map(|candidate| candidate.id).collect()
    }

    fn greedy_closest(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        start: Candidate,
        layer: usize,
    ) -> Candidate {
        let mut best = start;
        loop {
            let mut improved = false;
            for &neighbor in self.neighbors(best.id, layer) {
                let distance = self.distance(source, query, neighbor);
                if distance < best.distance {
                    best = Candidate { distance, id: neighbor };
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Best-first search on one layer. Returns up to `ef` candidates, nearest first.
    fn search_layer(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        entries: &[Candidate],
        ef: usize,
        layer: usize,
        visited: &mut VisitedSet,
    ) -> Vec<Candidate> {
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entries {
            if visited.insert(entry.id) {
                frontier.push(Reverse(entry));
                results.push(entry);
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
            if current.distance > worst && results.len() >= ef {
                break;
            }

            for &neighbor in self.neighbors(current.id, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let distance = self.distance(source, query, neighbor);
                let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
                if results.len() < ef || distance < worst {
                    let candidate = Candidate { distance, id: neighbor };
                    frontier.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }
}

fn random_level(rng: &mut StdRng, level_mult: f64, max_level: usize) -> usize {
    let uniform: f64 = rng.random();
    let level = (-(1.0 - uniform).ln() * level_mult).floor() as usize;
    level.min(max_level)
}

impl VectorIndex for HnswIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Hnsw
    }

    fn len(&self) -> usize {
        self.links.len()
    }

    fn search(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        k: usize,
        filter: Option<&CandidateFilter<'_>>,
    ) -> Vec<Neighbor> {
        if k == 0 || source.len() != self.links.len() {
            return Vec::new();
        }
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };

        let mut nearest = Candidate {
            distance: self.distance(source, query, entry),
            id: entry,
        };
        for layer in (1..=self.top_level).rev() {
            nearest = self.greedy_closest(source, query, nearest, layer);
        }

        let ef = self.params.ef_search.max(k);
        let mut visited = VisitedSet::new(self.links.len());
        let found = self.search_layer(source, query, &[nearest], ef, 0, &mut visited);

        let mut neighbors: Vec<Neighbor> = found
            .into_iter()
            .filter(|candidate| filter.is_none_or(|accept| accept(candidate.id)))
            .map(|candidate| Neighbor {
                offset: candidate.id,
                distance: candidate.distance,
            })
            .collect();
        top_k(&mut neighbors, source, k);
        neighbors
    }
}
