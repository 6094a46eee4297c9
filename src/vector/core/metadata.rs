//! Scalar metadata attached to vector records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};

/// Metadata map of a record. Ordered so serialized forms are deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl MetadataValue {
    /// Approximate encoded size of the value in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            MetadataValue::Bool(_) => 1,
            MetadataValue::Number(_) => 8,
            MetadataValue::String(s) => s.len(),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Number(n) => write!(f, "{n}"),
            MetadataValue::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

/// Size limits applied to a record's metadata on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataLimits {
    pub max_keys: usize,
    pub max_bytes: usize,
    pub max_key_bytes: usize,
}

/// Approximate encoded size of a metadata map (keys plus values).
pub fn metadata_size(metadata: &Metadata) -> usize {
    metadata
        .iter()
        .map(|(key, value)| key.len() + value.encoded_len())
        .sum()
}

/// Check a metadata map against the configured limits.
pub fn validate_metadata(metadata: &Metadata, limits: &MetadataLimits) -> Result<()> {
    if metadata.len() > limits.max_keys {
        return Err(QuiverError::validation(format!(
            "Metadata has {} keys, maximum is {}",
            metadata.len(),
            limits.max_keys
        )));
    }

    for (key, value) in metadata {
        if key.is_empty() || key.len() > limits.max_key_bytes {
            return Err(QuiverError::validation(format!(
                "Metadata key length must be between 1 and {} bytes",
                limits.max_key_bytes
            )));
        }
        if let MetadataValue::Number(n) = value {
            if !n.is_finite() {
                return Err(QuiverError::validation(format!(
                    "Metadata value for {key:?} must be finite"
                )));
            }
        }
    }

    let size = metadata_size(metadata);
    if size > limits.max_bytes {
        return Err(QuiverError::validation(format!(
            "Metadata is {size} bytes, maximum is {}",
            limits.max_bytes
        )));
    }
    Ok(())
}
