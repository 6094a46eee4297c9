//! Immutable, columnar segments.

use ahash::{AHashMap, AHashSet};
use bit_vec::BitVec;
use chrono::{DateTime, Utc};

use crate::error::{QuiverError, Result};
use crate::vector::core::metadata::Metadata;
use crate::vector::core::record::{SegmentId, Tombstone, VectorRecord};
use crate::vector::index::VectorSource;
use crate::vector::segment::RecordSource;
use crate::vector::segment::buffer::WriteBuffer;

/// A sealed batch of records.
///
/// Vectors are stored contiguously (`offset * dimension`). Dead slots keep
/// their data so offsets match the buffer generation the segment was sealed
/// from.
#[derive(Debug, Clone)]
pub struct Segment {
    id: SegmentId,
    dimension: usize,
    keys: Vec<String>,
    vectors: Vec<f32>,
    metadata: Vec<Metadata>,
    live: BitVec,
    positions: AHashMap<String, u32>,
    tombstones: Vec<Tombstone>,
    tombstone_keys: AHashSet<String>,
    created_at: DateTime<Utc>,
}

impl Segment {
    /// Seal a buffer generation. The segment takes the buffer's generation as id.
    pub fn from_buffer(buffer: &WriteBuffer) -> Self {
        let len = buffer.len();
        let dimension = buffer.dimension();
        let mut keys = Vec::with_capacity(len);
        let mut vectors = Vec::with_capacity(len * dimension);
        let mut metadata = Vec::with_capacity(len);
        let mut live = BitVec::from_elem(len, false);
        let mut positions = AHashMap::with_capacity(buffer.live_count());

        for offset in 0..len as u32 {
            keys.push(buffer.key(offset).to_string());
            vectors.extend_from_slice(buffer.vector(offset));
            metadata.push(buffer.metadata(offset).clone());
            if buffer.is_live(offset) {
                live.set(offset as usize, true);
                positions.insert(buffer.key(offset).to_string(), offset);
            }
        }

        let tombstones = buffer.tombstones();
        let tombstone_keys = tombstones.iter().map(|t| t.key.clone()).collect();

        Self {
            id: buffer.generation(),
            dimension,
            keys,
            vectors,
            metadata,
            live,
            positions,
            tombstones,
            tombstone_keys,
            created_at: Utc::now(),
        }
    }

    /// Assemble a segment from decoded or compacted parts.
    ///
    /// `records` pairs each slot with its liveness. At most one live slot per
    /// key is accepted.
    pub fn from_parts(
        id: SegmentId,
        dimension: usize,
        records: Vec<(VectorRecord, bool)>,
        tombstones: Vec<Tombstone>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let len = records.len();
        let mut keys = Vec::with_capacity(len);
        let mut vectors = Vec::with_capacity(len * dimension);
        let mut metadata = Vec::with_capacity(len);
        let mut live = BitVec::from_elem(len, false);
        let mut positions = AHashMap::new();

        for (offset, (record, is_live)) in records.into_iter().enumerate() {
            if record.vector.len() != dimension {
                return Err(QuiverError::corrupt(format!(
                    "Segment {id}: record {} has dimension {}, expected {dimension}",
                    record.key,
                    record.vector.len()
                )));
            }
            if is_live {
                if positions.insert(record.key.clone(), offset as u32).is_some() {
                    return Err(QuiverError::corrupt(format!(
                        "Segment {id}: key {} is live twice",
                        record.key
                    )));
                }
                live.set(offset, true);
            }
            keys.push(record.key);
            vectors.extend_from_slice(&record.vector);
            metadata.push(record.metadata);
        }

        let tombstone_keys = tombstones.iter().map(|t| t.key.clone()).collect();
        Ok(Self {
            id,
            dimension,
            keys,
            vectors,
            metadata,
            live,
            positions,
            tombstones,
            tombstone_keys,
            created_at,
        })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn tombstones(&self) -> &[Tombstone] {
        &self.tombstones
    }

    /// Approximate size of the segment payload in bytes.
    pub fn byte_size(&self) -> usize {
        self.vectors.len() * std::mem::size_of::<f32>()
            + self.keys.iter().map(String::len).sum::<usize>()
            + self
                .metadata
                .iter()
                .map(crate::vector::core::metadata::metadata_size)
                .sum::<usize>()
    }
}

impl VectorSource for Segment {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn vector(&self, offset: u32) -> &[f32] {
        let start = offset as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn key(&self, offset: u32) -> &str {
        &self.keys[offset as usize]
    }
}

impl RecordSource for Segment {
    fn id(&self) -> SegmentId {
        self.id
    }

    fn vectors(&self) -> &dyn VectorSource {
        self
    }

    fn metadata(&self, offset: u32) -> &Metadata {
        &self.metadata[offset as usize]
    }

    fn is_live(&self, offset: u32) -> bool {
        self.live.get(offset as usize).unwrap_or(false)
    }

    fn live_offset(&self, key: &str) -> Option<u32> {
        self.positions.get(key).copied()
    }

    fn has_tombstone(&self, key: &str) -> bool {
        self.tombstone_keys.contains(key)
    }

    fn live_count(&self) -> usize {
        self.positions.len()
    }
}
