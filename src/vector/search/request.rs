//! Query requests and responses.

use serde::{Deserialize, Serialize};

use crate::vector::core::metadata::Metadata;
use crate::vector::filter::FilterExpr;

fn default_true() -> bool {
    true
}

/// A top-k similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    #[serde(alias = "k")]
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<FilterExpr>,
    #[serde(default)]
    pub include_vector: bool,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
}

impl QueryRequest {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            filter: None,
            include_vector: false,
            include_metadata: true,
        }
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_vectors(mut self, include: bool) -> Self {
        self.include_vector = include;
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub key: String,
    pub distance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// How a query was executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStats {
    /// Sources (segments and buffers) with at least one slot.
    pub sources_searched: usize,
    pub ann_searches: usize,
    pub flat_scans: usize,
    /// ANN searches whose filtered yield fell short and were redone by flat scan.
    pub escalations: usize,
    /// Segments scanned flat because the filter was estimated too selective.
    pub selectivity_fallbacks: usize,
}

impl QueryStats {
    pub(crate) fn merge(&mut self, other: &QueryStats) {
        self.sources_searched += other.sources_searched;
        self.ann_searches += other.ann_searches;
        self.flat_scans += other.flat_scans;
        self.escalations += other.escalations;
        self.selectivity_fallbacks += other.selectivity_fallbacks;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub hits: Vec<QueryHit>,
    pub stats: QueryStats,
}

impl QueryResponse {
    pub fn keys(&self) -> Vec<&str> {
        self.hits.iter().map(|hit| hit.key.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_defaults() {
        let json = r#"{
            "vector": [0.0, 1.0],
            "k": 3,
            "filter": {"operator": "exists", "metadata_key": "tag", "value": true}
        }"#;
        let request: QueryRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.top_k, 3);
        assert!(request.include_metadata);
        assert!(!request.include_vector);
        assert_eq!(request.filter, Some(FilterExpr::exists("tag", true)));
    }

    #[test]
    fn test_hit_omits_absent_fields() {
        let hit = QueryHit {
            key: "a".to_string(),
            distance: 0.5,
            metadata: None,
            vector: None,
        };
        assert_eq!(serde_json::to_string(&hit).unwrap(), r#"{"key":"a","distance":0.5}"#);
    }
}
