//! The manifest: the authoritative list of live segments of one index.
//!
//! Stored as JSON under [`MANIFEST_NAME`]. A new segment set becomes durable
//! with a single `put` of this object, so readers of the storage always see
//! either the old or the new set.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::storage::Storage;
use crate::vector::core::record::SegmentId;
use crate::vector::index::config::BackendKind;

pub const MANIFEST_NAME: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

/// Prefix of every segment and ANN object.
pub const SEGMENTS_PREFIX: &str = "segments/";

pub fn segment_object_name(id: SegmentId) -> String {
    format!("{SEGMENTS_PREFIX}{id:020}.seg")
}

pub fn ann_object_name(id: SegmentId, kind: BackendKind) -> String {
    format!("{SEGMENTS_PREFIX}{id:020}.{kind}.ann")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: SegmentId,
    /// Slots in the segment, dead ones included.
    pub records: usize,
    pub live_records: usize,
    pub tombstones: usize,
    /// Backend of the persisted ANN object, if one was written.
    #[serde(default)]
    pub ann: Option<BackendKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Live segments, oldest first. Later segments mask earlier ones.
    pub segments: Vec<ManifestEntry>,
    /// Lower bound for the next segment or buffer generation id.
    pub next_segment_id: SegmentId,
    /// Incremented by every compaction; pagination cursors carry it.
    pub compaction_epoch: u64,
    pub last_write_seq: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            segments: Vec::new(),
            next_segment_id: 0,
            compaction_epoch: 0,
            last_write_seq: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Manifest {
    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(QuiverError::corrupt(format!(
                "Unsupported manifest version {}",
                self.version
            )));
        }
        let mut seen = HashSet::with_capacity(self.segments.len());
        for entry in &self.segments {
            if !seen.insert(entry.id) {
                return Err(QuiverError::corrupt(format!(
                    "Segment {} listed twice in manifest",
                    entry.id
                )));
            }
            if entry.id >= self.next_segment_id {
                return Err(QuiverError::corrupt(format!(
                    "Segment {} is not below next_segment_id {}",
                    entry.id, self.next_segment_id
                )));
            }
        }
        Ok(())
    }

    /// Load the manifest, or `None` for a fresh index.
    pub fn load(storage: &dyn Storage) -> Result<Option<Self>> {
        let Some(bytes) = storage.try_get(MANIFEST_NAME)? else {
            return Ok(None);
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| QuiverError::corrupt(format!("Unreadable manifest: {e}")))?;
        manifest.validate()?;
        Ok(Some(manifest))
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        storage.put(MANIFEST_NAME, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn entry(id: SegmentId) -> ManifestEntry {
        ManifestEntry {
            id,
            records: 10,
            live_records: 9,
            tombstones: 1,
            ann: None,
        }
    }

    #[test]
    fn test_object_names_sort_by_id() {
        assert_eq!(segment_object_name(7), "segments/00000000000000000007.seg");
        assert_eq!(
            ann_object_name(7, BackendKind::IvfPq),
            "segments/00000000000000000007.ivf_pq.ann"
        );
        assert!(segment_object_name(9) < segment_object_name(10));
    }

    #[test]
    fn test_save_and_load() {
        let storage = MemoryStorage::new();
        assert!(Manifest::load(&storage).unwrap().is_none());

        let manifest = Manifest {
            segments: vec![entry(1), entry(3)],
            next_segment_id: 5,
            compaction_epoch: 2,
            ..Manifest::default()
        };
        manifest.save(&storage).unwrap();
        assert_eq!(Manifest::load(&storage).unwrap(), Some(manifest));
    }

    #[test]
    fn test_validation() {
        let duplicate = Manifest {
            segments: vec![entry(1), entry(1)],
            next_segment_id: 2,
            ..Manifest::default()
        };
        assert!(duplicate.validate().is_err());

        let ahead = Manifest {
            segments: vec![entry(4)],
            next_segment_id: 4,
            ..Manifest::default()
        };
        assert!(ahead.validate().is_err());

        let storage = MemoryStorage::new();
        storage.put(MANIFEST_NAME, b"{not json").unwrap();
        assert!(matches!(Manifest::load(&storage), Err(QuiverError::Corrupt(_))));
    }
}
