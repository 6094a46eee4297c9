//! The mutable, in-memory buffer generation.

use std::sync::Arc;

use ahash::AHashMap;

use crate::vector::core::metadata::Metadata;
use crate::vector::core::record::{SegmentId, Tombstone, VectorRecord};
use crate::vector::index::VectorSource;
use crate::vector::segment::RecordSource;

/// Records and tombstones accepted since the last flush.
///
/// Writing a key that is live in this generation replaces its slot in place.
/// Deleting a key leaves its slot behind as a dead entry so that offsets of
/// later slots do not move.
#[derive(Debug, Clone)]
pub struct WriteBuffer {
    generation: SegmentId,
    dimension: usize,
    slots: Vec<Arc<VectorRecord>>,
    positions: AHashMap<String, u32>,
    tombstones: AHashMap<String, Tombstone>,
    bytes: usize,
}

impl WriteBuffer {
    pub fn new(generation: SegmentId, dimension: usize) -> Self {
        Self {
            generation,
            dimension,
            slots: Vec::new(),
            positions: AHashMap::new(),
            tombstones: AHashMap::new(),
            bytes: 0,
        }
    }

    pub fn generation(&self) -> SegmentId {
        self.generation
    }

    /// Nothing to seal: no slots and no tombstones.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.tombstones.is_empty()
    }

    /// Approximate payload size, compared against the byte flush threshold.
    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Tombstones sorted by key.
    pub fn tombstones(&self) -> Vec<Tombstone> {
        let mut tombstones: Vec<Tombstone> = self.tombstones.values().cloned().collect();
        tombstones.sort_by(|a, b| a.key.cmp(&b.key));
        tombstones
    }

    /// Add or replace the record for its key, returning its offset.
    ///
    /// The caller has already validated the record.
    pub fn append(&mut self, record: VectorRecord) -> u32 {
        self.tombstones.remove(&record.key);
        self.bytes += record.estimated_bytes();

        if let Some(&offset) = self.positions.get(&record.key) {
            let previous = std::mem::replace(&mut self.slots[offset as usize], Arc::new(record));
            self.bytes = self.bytes.saturating_sub(previous.estimated_bytes());
            return offset;
        }

        let offset = self.slots.len() as u32;
        self.positions.insert(record.key.clone(), offset);
        self.slots.push(Arc::new(record));
        offset
    }

    /// Record a deletion of `key` at write sequence `seq`.
    pub fn delete(&mut self, key: &str, seq: u64) {
        self.positions.remove(key);
        if !self.tombstones.contains_key(key) {
            self.bytes += key.len();
        }
        self.tombstones.insert(
            key.to_string(),
            Tombstone {
                key: key.to_string(),
                segment_seq: self.generation,
                visible_as_of: seq,
            },
        );
    }
}

impl VectorSource for WriteBuffer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn vector(&self, offset: u32) -> &[f32] {
        &self.slots[offset as usize].vector
    }

    fn key(&self, offset: u32) -> &str {
        &self.slots[offset as usize].key
    }
}

impl RecordSource for WriteBuffer {
    fn id(&self) -> SegmentId {
        self.generation
    }

    fn vectors(&self) -> &dyn VectorSource {
        self
    }

    fn metadata(&self, offset: u32) -> &Metadata {
        &self.slots[offset as usize].metadata
    }

    fn is_live(&self, offset: u32) -> bool {
        self.slots
            .get(offset as usize)
            .is_some_and(|record| self.positions.get(&record.key) == Some(&offset))
    }

    fn live_offset(&self, key: &str) -> Option<u32> {
        self.positions.get(key).copied()
    }

    fn has_tombstone(&self, key: &str) -> bool {
        self.tombstones.contains_key(key)
    }

    fn live_count(&self) -> usize {
        self.positions.len()
    }
}
