//! Index descriptors and backend parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::vector::core::distance::DistanceMetric;

/// The closed set of ANN backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Flat,
    Hnsw,
    IvfPq,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Flat => "flat",
            BackendKind::Hnsw => "hnsw",
            BackendKind::IvfPq => "ivf_pq",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "flat" | "brute_force" => Ok(BackendKind::Flat),
            "hnsw" => Ok(BackendKind::Hnsw),
            "ivf_pq" | "ivfpq" => Ok(BackendKind::IvfPq),
            _ => Err(QuiverError::validation(format!("Unknown backend kind: {s}"))),
        }
    }

    /// Whether search results are exact.
    pub fn is_exact(&self) -> bool {
        matches!(self, BackendKind::Flat)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = QuiverError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

/// Build and search parameters of the HNSW backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Max connections per node on upper layers; layer 0 allows `2 * m`.
    pub m: usize,
    /// Candidate list width while inserting.
    pub ef_construction: usize,
    /// Candidate list width while searching; raised to `k` when smaller.
    pub ef_search: usize,
    /// Highest layer a node can be assigned to.
    pub max_level: usize,
    /// Seed for level assignment.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_level: 16,
            seed: 42,
        }
    }
}

impl HnswParams {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(QuiverError::validation("HNSW m must be at least 2"));
        }
        if self.ef_construction < self.m {
            return Err(QuiverError::validation(
                "HNSW ef_construction must be at least m",
            ));
        }
        if self.ef_search == 0 {
            return Err(QuiverError::validation("HNSW ef_search must be positive"));
        }
        Ok(())
    }
}

/// Build and search parameters of the IVF-PQ backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfPqParams {
    /// Number of coarse partitions (capped by the segment size at build time).
    pub n_partitions: usize,
    /// Partitions probed per query.
    pub n_probe: usize,
    /// Subvectors per encoded residual; 0 picks the largest divisor of the dimension up to 16.
    pub n_subquantizers: usize,
    /// Bits per subvector code (1..=8).
    pub bits: u8,
    /// k-means iterations for partitions and codebooks.
    pub training_iterations: usize,
    pub seed: u64,
}

impl Default for IvfPqParams {
    fn default() -> Self {
        Self {
            n_partitions: 64,
            n_probe: 8,
            n_subquantizers: 0,
            bits: 8,
            training_iterations: 20,
            seed: 42,
        }
    }
}

impl IvfPqParams {
    pub fn validate(&self, dimension: usize) -> Result<()> {
        if self.n_partitions == 0 {
            return Err(QuiverError::validation("IVF n_partitions must be positive"));
        }
        if self.n_probe == 0 || self.n_probe > self.n_partitions {
            return Err(QuiverError::validation(
                "IVF n_probe must be between 1 and n_partitions",
            ));
        }
        if self.bits == 0 || self.bits > 8 {
            return Err(QuiverError::validation("PQ bits must be between 1 and 8"));
        }
        if self.n_subquantizers != 0 && dimension % self.n_subquantizers != 0 {
            return Err(QuiverError::validation(format!(
                "PQ n_subquantizers ({}) must divide the dimension ({dimension})",
                self.n_subquantizers
            )));
        }
        Ok(())
    }

    /// Subquantizer count actually used for `dimension`.
    pub fn resolved_subquantizers(&self, dimension: usize) -> usize {
        if self.n_subquantizers != 0 {
            return self.n_subquantizers;
        }
        (1..=dimension.min(16))
            .rev()
            .find(|m| dimension % m == 0)
            .unwrap_or(1)
    }
}

/// Backend choice plus its parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendParams {
    #[default]
    Flat,
    Hnsw(HnswParams),
    IvfPq(IvfPqParams),
}

impl BackendParams {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendParams::Flat => BackendKind::Flat,
            BackendParams::Hnsw(_) => BackendKind::Hnsw,
            BackendParams::IvfPq(_) => BackendKind::IvfPq,
        }
    }

    /// Build parameters for `kind` from an optional JSON object of overrides.
    pub fn from_kind(kind: BackendKind, params: Option<serde_json::Value>) -> Result<Self> {
        let params = params.unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        let invalid = |e: serde_json::Error| {
            QuiverError::validation(format!("Invalid {kind} parameters: {e}"))
        };
        Ok(match kind {
            BackendKind::Flat => BackendParams::Flat,
            BackendKind::Hnsw => {
                BackendParams::Hnsw(serde_json::from_value(params).map_err(invalid)?)
            }
            BackendKind::IvfPq => {
                BackendParams::IvfPq(serde_json::from_value(params).map_err(invalid)?)
            }
        })
    }
}

/// Immutable shape of a logical index, fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub dimension: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default)]
    pub backend: BackendParams,
    /// Metadata keys stored with records but rejected in filters.
    #[serde(default)]
    pub non_filterable_metadata_keys: Vec<String>,
}

impl IndexDescriptor {
    pub fn new(dimension: usize, metric: DistanceMetric, backend: BackendParams) -> Self {
        Self {
            dimension,
            metric,
            backend,
            non_filterable_metadata_keys: Vec::new(),
        }
    }

    pub fn flat(dimension: usize, metric: DistanceMetric) -> Self {
        Self::new(dimension, metric, BackendParams::Flat)
    }

    pub fn hnsw(dimension: usize, metric: DistanceMetric, params: HnswParams) -> Self {
        Self::new(dimension, metric, BackendParams::Hnsw(params))
    }

    pub fn ivf_pq(dimension: usize, metric: DistanceMetric, params: IvfPqParams) -> Self {
        Self::new(dimension, metric, BackendParams::IvfPq(params))
    }

    pub fn with_non_filterable_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_filterable_metadata_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn validate(&self, max_dimension: usize) -> Result<()> {
        if self.dimension == 0 || self.dimension > max_dimension {
            return Err(QuiverError::validation(format!(
                "Dimension must be between 1 and {max_dimension}, got {}",
                self.dimension
            )));
        }
        match &self.backend {
            BackendParams::Flat => Ok(()),
            BackendParams::Hnsw(params) => params.validate(),
            BackendParams::IvfPq(params) => params.validate(self.dimension),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!(BackendKind::parse_str("IVF-PQ").unwrap(), BackendKind::IvfPq);
        assert_eq!("hnsw".parse::<BackendKind>().unwrap(), BackendKind::Hnsw);
        assert!(BackendKind::parse_str("lsh").is_err());
        assert!(BackendKind::Flat.is_exact());
        assert!(!BackendKind::Hnsw.is_exact());
    }

    #[test]
    fn test_backend_params_json() {
        let params: BackendParams = serde_json::from_str(r#"{"kind":"hnsw","m":8}"#).unwrap();
        match params {
            BackendParams::Hnsw(hnsw) => {
                assert_eq!(hnsw.m, 8);
                assert_eq!(hnsw.ef_search, 64);
            }
            other => panic!("unexpected params {other:?}"),
        }

        let flat: BackendParams = serde_json::from_str(r#"{"kind":"flat"}"#).unwrap();
        assert_eq!(flat, BackendParams::Flat);
    }

    #[test]
    fn test_from_kind() {
        let params = BackendParams::from_kind(
            BackendKind::IvfPq,
            Some(serde_json::json!({"n_partitions": 4, "n_probe": 2})),
        )
        .unwrap();
        assert_eq!(params.kind(), BackendKind::IvfPq);
        let wrong_type = Some(serde_json::json!({"m": "x"}));
        assert!(BackendParams::from_kind(BackendKind::Hnsw, wrong_type).is_err());
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(IndexDescriptor::flat(2, DistanceMetric::Euclidean).validate(4096).is_ok());
        assert!(IndexDescriptor::flat(0, DistanceMetric::Euclidean).validate(4096).is_err());
        assert!(IndexDescriptor::flat(5000, DistanceMetric::Euclidean).validate(4096).is_err());

        let bad_hnsw = HnswParams {
            m: 1,
            ..HnswParams::default()
        };
        assert!(IndexDescriptor::hnsw(8, DistanceMetric::Cosine, bad_hnsw).validate(4096).is_err());

        let bad_pq = IvfPqParams {
            n_subquantizers: 3,
            ..IvfPqParams::default()
        };
        assert!(IndexDescriptor::ivf_pq(8, DistanceMetric::Dot, bad_pq).validate(4096).is_err());

        let bad_probe = IvfPqParams {
            n_partitions: 4,
            n_probe: 5,
            ..IvfPqParams::default()
        };
        assert!(IndexDescriptor::ivf_pq(8, DistanceMetric::Dot, bad_probe).validate(4096).is_err());
    }

    #[test]
    fn test_resolved_subquantizers() {
        let params = IvfPqParams::default();
        assert_eq!(params.resolved_subquantizers(128), 16);
        assert_eq!(params.resolved_subquantizers(12), 12);
        assert_eq!(params.resolved_subquantizers(17), 1);
        assert_eq!(params.resolved_subquantizers(2), 2);
    }
}
