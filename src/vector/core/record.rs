//! Vector records, tombstones and positional identifiers.

use serde::{Deserialize, Serialize};

use crate::vector::core::metadata::{Metadata, MetadataValue, metadata_size};

/// Identifier of a sealed segment or of the buffer generation that will become one.
///
/// Allocated from a strictly increasing counter and never reused.
pub type SegmentId = u64;

/// A keyed vector with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub key: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorRecord {
    /// Create a record without metadata.
    pub fn new(key: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            key: key.into(),
            vector,
            metadata: Metadata::new(),
        }
    }

    /// Replace the metadata map.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add one metadata field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Get the dimensionality of this record's vector.
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Approximate in-memory footprint, used for byte-size flush triggers.
    pub fn estimated_bytes(&self) -> usize {
        self.key.len()
            + self.vector.len() * std::mem::size_of::<f32>()
            + metadata_size(&self.metadata)
    }
}

/// A logical deletion of `key`, recorded in generation `segment_seq`.
///
/// It masks every occurrence of the key in earlier segments. `visible_as_of`
/// is the write sequence number at which the deletion took effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub key: String,
    pub segment_seq: SegmentId,
    pub visible_as_of: u64,
}

/// Position of an appended record inside a buffer generation.
///
/// Offsets survive sealing: the record is found at the same offset of the
/// segment with id `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferedOffset {
    pub generation: SegmentId,
    pub offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = VectorRecord::new("doc-1", vec![1.0, 2.0, 3.0])
            .with_field("genre", "jazz")
            .with_field("year", 1959);
        assert_eq!(record.dimension(), 3);
        assert_eq!(record.metadata.len(), 2);
        assert_eq!(record.estimated_bytes(), 5 + 12 + (5 + 4) + (4 + 8));
    }

    #[test]
    fn test_record_json_defaults_metadata() {
        let json = r#"{"key":"a","vector":[0.5,1.5]}"#;
        let record: VectorRecord = serde_json::from_str(json).unwrap();
        assert!(record.metadata.is_empty());
        assert_eq!(record.vector, vec![0.5, 1.5]);
    }
}
