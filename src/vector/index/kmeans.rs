//! Seeded k-means clustering used to train IVF partitions and PQ codebooks.
//!
//! Clustering always runs in squared Euclidean space. Initialization is
//! k-means++ driven by a seeded RNG, so identical inputs produce identical
//! centroids.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{QuiverError, Result};
use crate::util::simd;

/// Parameters for one k-means run.
#[derive(Debug, Clone, Copy)]
pub struct KMeansConfig {
    pub clusters: usize,
    pub max_iterations: usize,
    pub tolerance: f32,
    pub seed: u64,
}

impl KMeansConfig {
    pub fn new(clusters: usize, max_iterations: usize, seed: u64) -> Self {
        Self {
            clusters,
            max_iterations,
            tolerance: 1e-6,
            seed,
        }
    }
}

const PARALLEL_THRESHOLD: usize = 1000;

/// Train centroids over `points`.
///
/// Returns `min(config.clusters, points.len())` centroids.
pub fn train(points: &[&[f32]], config: &KMeansConfig) -> Result<Vec<Vec<f32>>> {
    if points.is_empty() {
        return Err(QuiverError::build("Cannot train centroids on an empty vector set"));
    }
    if config.clusters == 0 {
        return Err(QuiverError::build("Cluster count must be positive"));
    }

    let dimension = points[0].len();
    let k = config.clusters.min(points.len());
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = init_plus_plus(points, k, &mut rng);

    for _ in 0..config.max_iterations {
        let assignments = assign(points, &centroids);
        let updated = update(points, &assignments, &centroids, dimension);
        let movement: f32 = centroids
            .iter()
            .zip(&updated)
            .map(|(old, new)| simd::squared_l2(old, new))
            .sum::<f32>()
            / k as f32;
        centroids = updated;
        if movement < config.tolerance {
            break;
        }
    }

    Ok(centroids)
}

/// Index and squared distance of the nearest centroid.
pub fn nearest(centroids: &[Vec<f32>], point: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = simd::squared_l2(point, centroid);
        if distance < best.1 {
            best = (i, distance);
        }
    }
    best
}

/// Assign each point to its nearest centroid.
pub fn assign(points: &[&[f32]], centroids: &[Vec<f32>]) -> Vec<usize> {
    if points.len() > PARALLEL_THRESHOLD {
        points
            .par_iter()
            .map(|point| nearest(centroids, point).0)
            .collect()
    } else {
        points.iter().map(|point| nearest(centroids, point).0).collect()
    }
}

fn init_plus_plus(points: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..points.len())].to_vec());

    let mut min_distances: Vec<f32> = points
        .iter()
        .map(|point| simd::squared_l2(point, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_distances.iter().map(|&d| d as f64).sum();
        let chosen = if total <= 0.0 {
            rng.random_range(0..points.len())
        } else {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = points.len() - 1;
            for (i, &weight) in min_distances.iter().enumerate() {
                cumulative += weight as f64;
                if cumulative >= target {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = points[chosen].to_vec();
        for (distance, point) in min_distances.iter_mut().zip(points) {
            *distance = distance.min(simd::squared_l2(point, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

fn update(
    points: &[&[f32]],
    assignments: &[usize],
    previous: &[Vec<f32>],
    dimension: usize,
) -> Vec<Vec<f32>> {
    let mut sums = vec![vec![0.0f64; dimension]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (point, &cluster) in points.iter().zip(assignments) {
        counts[cluster] += 1;
        for (sum, &value) in sums[cluster].iter_mut().zip(point.iter()) {
            *sum += value as f64;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                // Empty clusters keep their previous centroid.
                old.clone()
            } else {
                sum.into_iter().map(|s| (s / count as f64) as f32).collect()
            }
        })
        .collect()
}
