//! Metadata filter expressions and their compiled predicates.
//!
//! A [`FilterExpr`] is the structured tree a caller sends with a query, in the
//! canonical JSON shape:
//!
//! ```json
//! {"operator": "and", "conditions": [
//!     {"operator": "equals", "metadata_key": "genre", "value": "jazz"},
//!     {"operator": "greater_than", "metadata_key": "year", "value": 1950}
//! ]}
//! ```
//!
//! [`CompiledFilter::compile`] validates the tree once per query and produces a
//! predicate evaluated against each candidate's metadata. Evaluation never
//! fails: a missing key or a value of the wrong type simply does not match.
//! Absent keys satisfy only `not_equals`, `not_in` and `exists(false)`.

use std::cmp::Ordering;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::vector::core::metadata::{Metadata, MetadataValue};

/// A filter expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum FilterExpr {
    Equals {
        metadata_key: String,
        value: MetadataValue,
    },
    NotEquals {
        metadata_key: String,
        value: MetadataValue,
    },
    In {
        metadata_key: String,
        value: Vec<MetadataValue>,
    },
    NotIn {
        metadata_key: String,
        value: Vec<MetadataValue>,
    },
    GreaterThan {
        metadata_key: String,
        value: MetadataValue,
    },
    LessThan {
        metadata_key: String,
        value: MetadataValue,
    },
    GreaterEqual {
        metadata_key: String,
        value: MetadataValue,
    },
    LessEqual {
        metadata_key: String,
        value: MetadataValue,
    },
    Exists {
        metadata_key: String,
        value: bool,
    },
    And {
        conditions: Vec<FilterExpr>,
    },
    Or {
        conditions: Vec<FilterExpr>,
    },
}

impl FilterExpr {
    pub fn equals(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        FilterExpr::Equals {
            metadata_key: key.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        FilterExpr::NotEquals {
            metadata_key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<MetadataValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        FilterExpr::In {
            metadata_key: key.into(),
            value: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<V: Into<MetadataValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        FilterExpr::NotIn {
            metadata_key: key.into(),
            value: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn greater_than(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        FilterExpr::GreaterThan {
            metadata_key: key.into(),
            value: value.into(),
        }
    }

    pub fn less_than(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        FilterExpr::LessThan {
            metadata_key: key.into(),
            value: value.into(),
        }
    }

    pub fn greater_equal(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        FilterExpr::GreaterEqual {
            metadata_key: key.into(),
            value: value.into(),
        }
    }

    pub fn less_equal(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        FilterExpr::LessEqual {
            metadata_key: key.into(),
            value: value.into(),
        }
    }

    pub fn exists(key: impl Into<String>, present: bool) -> Self {
        FilterExpr::Exists {
            metadata_key: key.into(),
            value: present,
        }
    }

    pub fn and(conditions: Vec<FilterExpr>) -> Self {
        FilterExpr::And { conditions }
    }

    pub fn or(conditions: Vec<FilterExpr>) -> Self {
        FilterExpr::Or { conditions }
    }

    /// Parse the canonical JSON form. Unknown operators and malformed
    /// operands are reported as [`QuiverError::InvalidFilter`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| QuiverError::invalid_filter(e.to_string()))
    }

    /// Same as [`FilterExpr::from_json`] for an already parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| QuiverError::invalid_filter(e.to_string()))
    }

    /// Metadata keys referenced anywhere in the tree.
    pub fn referenced_keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, keys: &mut Vec<&'a str>) {
        match self {
            FilterExpr::And { conditions } | FilterExpr::Or { conditions } => {
                for condition in conditions {
                    condition.collect_keys(keys);
                }
            }
            FilterExpr::Equals { metadata_key, .. }
            | FilterExpr::NotEquals { metadata_key, .. }
            | FilterExpr::In { metadata_key, .. }
            | FilterExpr::NotIn { metadata_key, .. }
            | FilterExpr::GreaterThan { metadata_key, .. }
            | FilterExpr::LessThan { metadata_key, .. }
            | FilterExpr::GreaterEqual { metadata_key, .. }
            | FilterExpr::LessEqual { metadata_key, .. }
            | FilterExpr::Exists { metadata_key, .. } => keys.push(metadata_key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

/// Literal set of an `in`/`not_in` predicate, split by type.
#[derive(Debug, Clone, Default)]
struct ValueSet {
    strings: AHashSet<String>,
    numbers: Vec<f64>,
    bools: [bool; 2],
}

impl ValueSet {
    fn new(values: &[MetadataValue]) -> Self {
        let mut set = ValueSet::default();
        for value in values {
            match value {
                MetadataValue::String(s) => {
                    set.strings.insert(s.clone());
                }
                MetadataValue::Number(n) => set.numbers.push(*n),
                MetadataValue::Bool(b) => set.bools[usize::from(*b)] = true,
            }
        }
        set
    }

    fn contains(&self, value: &MetadataValue) -> bool {
        match value {
            MetadataValue::String(s) => self.strings.contains(s),
            MetadataValue::Number(n) => self.numbers.iter().any(|candidate| candidate == n),
            MetadataValue::Bool(b) => self.bools[usize::from(*b)],
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Always,
    Equals(String, MetadataValue),
    NotEquals(String, MetadataValue),
    In(String, ValueSet),
    NotIn(String, ValueSet),
    Compare(String, CompareOp, MetadataValue),
    Exists(String, bool),
    And(Vec<Node>),
    Or(Vec<Node>),
}

/// Ordering between two values of the same comparable type.
fn compare(actual: &MetadataValue, literal: &MetadataValue) -> Option<Ordering> {
    match (actual, literal) {
        (MetadataValue::Number(a), MetadataValue::Number(b)) => a.partial_cmp(b),
        (MetadataValue::String(a), MetadataValue::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl Node {
    fn eval(&self, metadata: &Metadata) -> bool {
        match self {
            Node::Always => true,
            Node::Equals(key, value) => metadata.get(key) == Some(value),
            Node::NotEquals(key, value) => metadata.get(key) != Some(value),
            Node::In(key, set) => metadata.get(key).is_some_and(|v| set.contains(v)),
            Node::NotIn(key, set) => !metadata.get(key).is_some_and(|v| set.contains(v)),
            Node::Compare(key, op, literal) => metadata
                .get(key)
                .and_then(|actual| compare(actual, literal))
                .is_some_and(|ordering| op.accepts(ordering)),
            Node::Exists(key, expected) => metadata.contains_key(key) == *expected,
            Node::And(children) => children.iter().all(|child| child.eval(metadata)),
            Node::Or(children) => children.iter().any(|child| child.eval(metadata)),
        }
    }
}

/// A validated filter ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    root: Node,
}

impl CompiledFilter {
    /// A filter that accepts every record.
    pub fn always() -> Self {
        CompiledFilter { root: Node::Always }
    }

    /// Compile an expression tree.
    pub fn compile(expr: &FilterExpr) -> Result<Self> {
        Ok(CompiledFilter {
            root: compile_node(expr)?,
        })
    }

    /// Whether this filter accepts every record without looking at it.
    pub fn is_always(&self) -> bool {
        matches!(self.root, Node::Always)
    }

    /// Evaluate the predicate against one record's metadata.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.root.eval(metadata)
    }
}

fn leaf_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(QuiverError::invalid_filter("metadata_key must not be empty"));
    }
    Ok(key.to_string())
}

fn compile_node(expr: &FilterExpr) -> Result<Node> {
    let node = match expr {
        FilterExpr::Equals { metadata_key, value } => {
            Node::Equals(leaf_key(metadata_key)?, value.clone())
        }
        FilterExpr::NotEquals { metadata_key, value } => {
            Node::NotEquals(leaf_key(metadata_key)?, value.clone())
        }
        FilterExpr::In { metadata_key, value } => {
            Node::In(leaf_key(metadata_key)?, ValueSet::new(value))
        }
        FilterExpr::NotIn { metadata_key, value } => {
            Node::NotIn(leaf_key(metadata_key)?, ValueSet::new(value))
        }
        FilterExpr::GreaterThan { metadata_key, value } => {
            Node::Compare(leaf_key(metadata_key)?, CompareOp::Gt, value.clone())
        }
        FilterExpr::LessThan { metadata_key, value } => {
            Node::Compare(leaf_key(metadata_key)?, CompareOp::Lt, value.clone())
        }
        FilterExpr::GreaterEqual { metadata_key, value } => {
            Node::Compare(leaf_key(metadata_key)?, CompareOp::Ge, value.clone())
        }
        FilterExpr::LessEqual { metadata_key, value } => {
            Node::Compare(leaf_key(metadata_key)?, CompareOp::Le, value.clone())
        }
        FilterExpr::Exists { metadata_key, value } => Node::Exists(leaf_key(metadata_key)?, *value),
        FilterExpr::And { conditions } => {
            if conditions.is_empty() {
                return Err(QuiverError::invalid_filter("and requires at least one condition"));
            }
            Node::And(conditions.iter().map(compile_node).collect::<Result<_>>()?)
        }
        FilterExpr::Or { conditions } => {
            if conditions.is_empty() {
                return Err(QuiverError::invalid_filter("or requires at least one condition"));
            }
            Node::Or(conditions.iter().map(compile_node).collect::<Result<_>>()?)
        }
    };
    Ok(node)
}
