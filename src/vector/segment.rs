//! Append buffer, immutable segments and the store that sequences them.
//!
//! Records enter a mutable [`buffer::WriteBuffer`]. Flushing seals the buffer
//! into an immutable [`sealed::Segment`] with the same identifier and the same
//! offsets, persists it through [`codec`], and records the new segment set in
//! the [`manifest`]. [`store::SegmentStore`] owns that sequence and hands out
//! immutable snapshots to queries.
//!
//! Sources are totally ordered: sealed segments in manifest order, then
//! frozen buffers awaiting persistence, then the active buffer. A record is
//! visible when it is the live version of its key within its source and no
//! later source holds a record or tombstone for the same key.

pub mod buffer;
pub mod codec;
pub mod manifest;
pub mod sealed;
pub mod store;

use crate::vector::core::metadata::Metadata;
use crate::vector::core::record::{SegmentId, VectorRecord};
use crate::vector::index::VectorSource;

/// A sealed segment or buffer generation, seen through its offsets.
pub trait RecordSource: VectorSource {
    /// Segment id, or the id the buffer will be sealed under.
    fn id(&self) -> SegmentId;

    /// This source as a plain [`VectorSource`] for the ANN backends.
    fn vectors(&self) -> &dyn VectorSource;

    fn metadata(&self, offset: u32) -> &Metadata;

    /// Whether `offset` holds the current version of its key in this source.
    fn is_live(&self, offset: u32) -> bool;

    /// Offset of the live record for `key`, if any.
    fn live_offset(&self, key: &str) -> Option<u32>;

    /// Whether this source has a tombstone for `key`.
    fn has_tombstone(&self, key: &str) -> bool;

    /// Number of live records.
    fn live_count(&self) -> usize;

    /// Whether this source masks `key` in every earlier source.
    fn touches(&self, key: &str) -> bool {
        self.live_offset(key).is_some() || self.has_tombstone(key)
    }

    /// Owned copy of the record at `offset`.
    fn record(&self, offset: u32) -> VectorRecord {
        VectorRecord {
            key: self.key(offset).to_string(),
            vector: self.vector(offset).to_vec(),
            metadata: self.metadata(offset).clone(),
        }
    }
}
