//! Distance metrics for vector similarity calculation.
//!
//! Every metric is expressed as a distance: smaller means more similar, so all
//! backends and the merge step can order candidates ascending.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::util::simd;

/// Distance metrics for vector similarity calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean (L2) distance
    #[default]
    Euclidean,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
    /// Negated dot product
    Dot,
}

impl DistanceMetric {
    /// Calculate the distance between two vectors using this metric.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(QuiverError::dimension_mismatch(a.len(), b.len()));
        }
        Ok(self.distance_unchecked(a, b))
    }

    /// Distance between two vectors already known to share a dimension.
    #[inline]
    pub fn distance_unchecked(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => simd::squared_l2(a, b).sqrt(),
            DistanceMetric::Cosine => {
                let norm_a = simd::norm(a);
                let norm_b = simd::norm(b);
                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0
                } else {
                    1.0 - simd::dot(a, b) / (norm_a * norm_b)
                }
            }
            DistanceMetric::Dot => -simd::dot(a, b),
        }
    }

    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
        }
    }

    /// Parse a distance metric from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot" | "dot_product" | "inner_product" => Ok(DistanceMetric::Dot),
            _ => Err(QuiverError::validation(format!(
                "Unknown distance metric: {s}"
            ))),
        }
    }

}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistanceMetric {
    type Err = QuiverError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean() {
        let metric = DistanceMetric::Euclidean;
        assert_eq!(metric.distance(&[0.0, 0.0], &[0.0, 0.0]).unwrap(), 0.0);
        let d = metric.distance(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert!((d - std::f32::consts::SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_cosine() {
        let metric = DistanceMetric::Cosine;
        assert!(metric.distance(&[1.0, 0.0], &[2.0, 0.0]).unwrap().abs() < 1e-6);
        assert!((metric.distance(&[1.0, 0.0], &[0.0, 1.0]).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(metric.distance(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 1.0);
    }

    #[test]
    fn test_dot_orders_larger_products_first() {
        let metric = DistanceMetric::Dot;
        let near = metric.distance(&[1.0, 1.0], &[2.0, 2.0]).unwrap();
        let far = metric.distance(&[1.0, 1.0], &[0.5, 0.5]).unwrap();
        assert!(near < far);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = DistanceMetric::Euclidean
            .distance(&[1.0], &[1.0, 2.0])
            .unwrap_err();
        assert!(matches!(err, QuiverError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert_eq!(DistanceMetric::parse_str("dot_product").unwrap(), DistanceMetric::Dot);
        assert!(DistanceMetric::parse_str("hamming").is_err());
        assert_eq!(DistanceMetric::Cosine.to_string(), "cosine");
    }
}
