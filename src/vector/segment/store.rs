//! Sequencing of buffers and segments for one logical index.
//!
//! All mutable state lives behind one `RwLock<Arc<StoreState>>`. Readers clone
//! the `Arc` and work on an immutable snapshot; writers copy-on-write the state
//! (`Arc::make_mut`) while holding the write lock, which is only ever held for
//! in-memory updates. Encoding and storage I/O happen outside it, serialized
//! among themselves by `flush_lock`. Once [`SegmentStore::destroy`] has run,
//! nothing is written to storage again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{QuiverError, Result};
use crate::storage::Storage;
use crate::vector::core::record::{BufferedOffset, SegmentId, VectorRecord};
use crate::vector::index::config::BackendKind;
use crate::vector::index::{AnnIndex, VectorIndex, VectorSource};
use crate::vector::segment::RecordSource;
use crate::vector::segment::buffer::WriteBuffer;
use crate::vector::segment::codec;
use crate::vector::segment::manifest::{
    MANIFEST_VERSION, Manifest, ManifestEntry, ann_object_name, segment_object_name,
};
use crate::vector::segment::sealed::Segment;

/// A sealed segment together with its ANN structure, once built.
#[derive(Debug, Clone)]
pub struct LiveSegment {
    pub segment: Arc<Segment>,
    pub index: Option<Arc<AnnIndex>>,
    ann_persisted: bool,
}

impl LiveSegment {
    fn new(segment: Arc<Segment>) -> Self {
        Self {
            segment,
            index: None,
            ann_persisted: false,
        }
    }

    fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            id: self.segment.id(),
            records: self.segment.len(),
            live_records: self.segment.live_count(),
            tombstones: self.segment.tombstones().len(),
            ann: self
                .index
                .as_ref()
                .filter(|_| self.ann_persisted)
                .map(|index| index.kind()),
        }
    }
}

/// One searchable source within a snapshot.
#[derive(Debug, Clone, Copy)]
pub enum SourceRef<'a> {
    Sealed(&'a LiveSegment),
    Buffered(&'a WriteBuffer),
}

impl<'a> SourceRef<'a> {
    pub fn records(&self) -> &'a dyn RecordSource {
        match *self {
            SourceRef::Sealed(live) => live.segment.as_ref(),
            SourceRef::Buffered(buffer) => buffer,
        }
    }

    /// The built ANN structure; buffers never have one.
    pub fn index(&self) -> Option<&'a AnnIndex> {
        match *self {
            SourceRef::Sealed(live) => live.index.as_deref(),
            SourceRef::Buffered(_) => None,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.records().id()
    }
}

/// Whether a later source than `position` holds a record or tombstone for `key`.
pub fn is_masked(sources: &[SourceRef<'_>], position: usize, key: &str) -> bool {
    sources[position + 1..]
        .iter()
        .any(|source| source.records().touches(key))
}

/// Whether the slot at (`position`, `offset`) is the visible version of its key.
pub fn is_visible(sources: &[SourceRef<'_>], position: usize, offset: u32) -> bool {
    let source = sources[position].records();
    source.is_live(offset) && !is_masked(sources, position, source.key(offset))
}

/// Immutable view of the store taken atomically.
#[derive(Debug, Clone)]
pub struct StoreState {
    segments: Vec<LiveSegment>,
    frozen: Vec<Arc<WriteBuffer>>,
    buffer: Arc<WriteBuffer>,
    compaction_epoch: u64,
}

impl StoreState {
    /// Sources in masking order: sealed segments, frozen buffers, active buffer.
    pub fn sources(&self) -> Vec<SourceRef<'_>> {
        let mut sources = Vec::with_capacity(self.segments.len() + self.frozen.len() + 1);
        sources.extend(self.segments.iter().map(SourceRef::Sealed));
        sources.extend(self.frozen.iter().map(|buffer| SourceRef::Buffered(buffer.as_ref())));
        sources.push(SourceRef::Buffered(self.buffer.as_ref()));
        sources
    }

    pub fn segments(&self) -> &[LiveSegment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&LiveSegment> {
        self.segments.iter().find(|live| live.segment.id() == id)
    }

    pub fn frozen(&self) -> &[Arc<WriteBuffer>] {
        &self.frozen
    }

    pub fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    pub fn compaction_epoch(&self) -> u64 {
        self.compaction_epoch
    }

    /// The visible record for `key`, as its source and offset.
    pub fn lookup(&self, key: &str) -> Option<(SourceRef<'_>, u32)> {
        for source in self.sources().into_iter().rev() {
            let records = source.records();
            if let Some(offset) = records.live_offset(key) {
                return Some((source, offset));
            }
            if records.has_tombstone(key) {
                return None;
            }
        }
        None
    }

    /// Number of visible records across all sources.
    pub fn visible_count(&self) -> usize {
        let sources = self.sources();
        (0..sources.len())
            .map(|position| {
                let records = sources[position].records();
                (0..records.len() as u32)
                    .filter(|&offset| is_visible(&sources, position, offset))
                    .count()
            })
            .sum()
    }
}

/// Result of a compaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    pub segments_removed: Vec<SegmentId>,
    /// The rewritten segment, absent when nothing was visible.
    pub segment: Option<SegmentId>,
    pub records_kept: usize,
    pub records_dropped: usize,
    pub compaction_epoch: u64,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sealed_segments: usize,
    pub frozen_buffers: usize,
    pub sealed_slots: usize,
    pub buffered_records: usize,
    pub buffered_bytes: usize,
    pub tombstones: usize,
    pub indexed_segments: usize,
    pub compaction_epoch: u64,
}

#[derive(Debug)]
pub struct SegmentStore {
    dimension: usize,
    storage: Arc<dyn Storage>,
    state: RwLock<Arc<StoreState>>,
    flush_lock: Mutex<()>,
    manifest_lock: Mutex<()>,
    next_segment_id: AtomicU64,
    write_seq: AtomicU64,
    destroyed: AtomicBool,
}

impl SegmentStore {
    /// Initialize an empty store and persist its manifest.
    pub fn create(storage: Arc<dyn Storage>, dimension: usize) -> Result<Self> {
        let store = Self::from_parts(storage, dimension, Vec::new(), 0, 0, 0);
        store.write_manifest()?;
        Ok(store)
    }

    /// Load the segment set recorded in the manifest, or create a new store.
    ///
    /// ANN objects that fail to load are skipped; their segments are searched
    /// by flat scan until rebuilt.
    pub fn open(storage: Arc<dyn Storage>, dimension: usize) -> Result<Self> {
        let Some(manifest) = Manifest::load(storage.as_ref())? else {
            return Self::create(storage, dimension);
        };

        let mut segments = Vec::with_capacity(manifest.segments.len());
        for entry in &manifest.segments {
            let bytes = storage.get(&segment_object_name(entry.id))?;
            let segment = codec::decode(&bytes)?;
            if segment.id() != entry.id || segment.dimension() != dimension {
                return Err(QuiverError::corrupt(format!(
                    "Segment object for {} holds segment {} of dimension {}",
                    entry.id,
                    segment.id(),
                    segment.dimension()
                )));
            }
            let mut live = LiveSegment::new(Arc::new(segment));
            if let Some(kind) = entry.ann {
                match load_ann(storage.as_ref(), &live.segment, kind) {
                    Ok(index) => {
                        live.index = Some(Arc::new(index));
                        live.ann_persisted = true;
                    }
                    Err(e) => warn!("Segment {}: discarding {kind} index: {e}", entry.id),
                }
            }
            segments.push(live);
        }

        info!(
            "Opened {} segments (epoch {}, next id {})",
            segments.len(),
            manifest.compaction_epoch,
            manifest.next_segment_id
        );
        Ok(Self::from_parts(
            storage,
            dimension,
            segments,
            manifest.next_segment_id,
            manifest.compaction_epoch,
            manifest.last_write_seq,
        ))
    }

    fn from_parts(
        storage: Arc<dyn Storage>,
        dimension: usize,
        segments: Vec<LiveSegment>,
        next_segment_id: SegmentId,
        compaction_epoch: u64,
        write_seq: u64,
    ) -> Self {
        let state = StoreState {
            segments,
            frozen: Vec::new(),
            buffer: Arc::new(WriteBuffer::new(next_segment_id, dimension)),
            compaction_epoch,
        };
        Self {
            dimension,
            storage,
            state: RwLock::new(Arc::new(state)),
            flush_lock: Mutex::new(()),
            manifest_lock: Mutex::new(()),
            next_segment_id: AtomicU64::new(next_segment_id + 1),
            write_seq: AtomicU64::new(write_seq),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Atomic snapshot for queries and listings.
    pub fn snapshot(&self) -> Arc<StoreState> {
        self.state.read().clone()
    }

    /// Check a record against the store's structural rules.
    pub fn validate_record(&self, record: &VectorRecord) -> Result<()> {
        if record.key.is_empty() {
            return Err(QuiverError::validation("Vector key must not be empty"));
        }
        if record.vector.len() != self.dimension {
            return Err(QuiverError::dimension_mismatch(self.dimension, record.vector.len()));
        }
        if record.vector.iter().any(|v| !v.is_finite()) {
            return Err(QuiverError::validation(format!(
                "Vector {} contains NaN or infinite values",
                record.key
            )));
        }
        Ok(())
    }

    pub fn append(&self, record: VectorRecord) -> Result<BufferedOffset> {
        let mut offsets = self.append_batch(vec![record])?;
        offsets
            .pop()
            .ok_or_else(|| QuiverError::internal("Append produced no offset"))
    }

    /// Append all records or none of them.
    pub fn append_batch(&self, records: Vec<VectorRecord>) -> Result<Vec<BufferedOffset>> {
        for record in &records {
            self.validate_record(record)?;
        }

        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut guard);
        let buffer = Arc::make_mut(&mut state.buffer);
        let generation = buffer.generation();
        let offsets = records
            .into_iter()
            .map(|record| BufferedOffset {
                generation,
                offset: buffer.append(record),
            })
            .collect::<Vec<_>>();
        self.write_seq.fetch_add(offsets.len() as u64, Ordering::SeqCst);
        Ok(offsets)
    }

    /// Tombstone `key` if it is currently visible. Returns whether it was.
    pub fn delete(&self, key: &str) -> bool {
        self.delete_batch(&[key]) == 1
    }

    /// Tombstone every visible key of `keys`, returning how many were visible.
    pub fn delete_batch<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let mut guard = self.state.write();
        let mut deleted = 0;
        for key in keys {
            let key = key.as_ref();
            if guard.lookup(key).is_none() {
                continue;
            }
            let seq = self.write_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let state = Arc::make_mut(&mut guard);
            Arc::make_mut(&mut state.buffer).delete(key, seq);
            deleted += 1;
        }
        deleted
    }

    /// Active buffer slot count and approximate bytes.
    pub fn buffer_usage(&self) -> (usize, usize) {
        let state = self.state.read();
        (state.buffer.len(), state.buffer.byte_size())
    }

    /// Swap in a new buffer generation, queueing the current one for
    /// persistence. Returns the frozen generation, or `None` if it was empty.
    pub fn freeze(&self) -> Option<SegmentId> {
        let mut guard = self.state.write();
        if guard.buffer.is_empty() {
            return None;
        }
        let generation = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::make_mut(&mut guard);
        let sealed = std::mem::replace(
            &mut state.buffer,
            Arc::new(WriteBuffer::new(generation, self.dimension)),
        );
        let id = sealed.generation();
        state.frozen.push(sealed);
        Some(id)
    }

    /// Seal the active buffer and persist every frozen generation.
    ///
    /// Returns the id of the newest segment written, or `None` when there was
    /// nothing to flush. Writes keep landing in the new buffer generation
    /// while segments are encoded and stored.
    pub fn flush(&self) -> Result<Option<SegmentId>> {
        let _flushing = self.flush_lock.lock();
        self.check_not_destroyed()?;
        self.freeze();

        let mut newest = None;
        loop {
            let Some(buffer) = self.state.read().frozen.first().cloned() else {
                break;
            };
            let segment = Arc::new(Segment::from_buffer(&buffer));
            let bytes = codec::encode(&segment)?;
            self.storage.put(&segment_object_name(segment.id()), &bytes)?;

            {
                let mut guard = self.state.write();
                let state = Arc::make_mut(&mut guard);
                state.frozen.retain(|frozen| frozen.generation() != segment.id());
                state.segments.push(LiveSegment::new(segment.clone()));
            }
            self.write_manifest()?;

            debug!(
                "Flushed segment {} ({} records, {} tombstones, {} bytes)",
                segment.id(),
                segment.len(),
                segment.tombstones().len(),
                bytes.len()
            );
            newest = Some(segment.id());
        }
        Ok(newest)
    }

    /// Read the live record at (`id`, `offset`).
    pub fn read(&self, id: SegmentId, offset: u32) -> Result<VectorRecord> {
        let snapshot = self.snapshot();
        let sources = snapshot.sources();
        let source = sources
            .iter()
            .find(|source| source.id() == id)
            .ok_or_else(|| QuiverError::not_found(format!("Segment {id}")))?;
        let records = source.records();
        if (offset as usize) < records.len() && records.is_live(offset) {
            Ok(records.record(offset))
        } else {
            Err(QuiverError::not_found(format!("Record at segment {id} offset {offset}")))
        }
    }

    /// The visible record for `key`.
    pub fn lookup(&self, key: &str) -> Option<VectorRecord> {
        let snapshot = self.snapshot();
        snapshot
            .lookup(key)
            .map(|(source, offset)| source.records().record(offset))
    }

    /// Atomically attach a built structure to segment `id`. The structure is
    /// searchable immediately; [`persist_index`](Self::persist_index) writes it.
    ///
    /// Returns `false` if the segment no longer exists (compacted away while
    /// the structure was being built) or the store was destroyed.
    pub fn install_index(&self, id: SegmentId, index: Arc<AnnIndex>) -> bool {
        if self.destroyed.load(Ordering::SeqCst) {
            return false;
        }
        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut guard);
        match state.segments.iter_mut().find(|live| live.segment.id() == id) {
            Some(live) => {
                live.index = Some(index);
                live.ann_persisted = false;
                true
            }
            None => false,
        }
    }

    /// Write the installed structure of segment `id` next to the segment and
    /// record it in the manifest.
    ///
    /// Returns `false` when there is nothing to write: the segment is gone,
    /// has no structure, is already persisted, or the store was destroyed.
    pub fn persist_index(&self, id: SegmentId) -> Result<bool> {
        let _flushing = self.flush_lock.lock();
        if self.destroyed.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let snapshot = self.snapshot();
        let Some(index) = snapshot
            .segment(id)
            .filter(|live| !live.ann_persisted)
            .and_then(|live| live.index.clone())
        else {
            return Ok(false);
        };

        let kind = index.kind();
        self.storage.put(&ann_object_name(id, kind), &index.to_bytes()?)?;
        {
            let mut guard = self.state.write();
            let state = Arc::make_mut(&mut guard);
            let current = state.segments.iter_mut().find(|live| live.segment.id() == id);
            if let Some(live) = current {
                if live.index.as_ref().is_some_and(|installed| Arc::ptr_eq(installed, &index)) {
                    live.ann_persisted = true;
                }
            }
        }
        self.write_manifest()?;
        Ok(true)
    }

    /// Rewrite the visible records of all sealed segments into one segment
    /// and drop the rest. Bumps the compaction epoch, which expires every
    /// outstanding pagination cursor.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        let _flushing = self.flush_lock.lock();
        self.check_not_destroyed()?;
        let snapshot = self.snapshot();
        if snapshot.segments.is_empty() {
            return Ok(CompactionOutcome {
                segments_removed: Vec::new(),
                segment: None,
                records_kept: 0,
                records_dropped: 0,
                compaction_epoch: snapshot.compaction_epoch,
            });
        }

        let sealed: Vec<&Segment> =
            snapshot.segments.iter().map(|live| live.segment.as_ref()).collect();
        let removed: Vec<SegmentId> = sealed.iter().map(|segment| segment.id()).collect();
        let mut kept = Vec::new();
        let mut total = 0;
        for (position, segment) in sealed.iter().enumerate() {
            total += segment.len();
            for offset in 0..segment.len() as u32 {
                let key = segment.key(offset);
                let masked = sealed[position + 1..].iter().any(|later| later.touches(key));
                if segment.is_live(offset) && !masked {
                    kept.push((segment.record(offset), true));
                }
            }
        }
        let records_kept = kept.len();

        let replacement = if kept.is_empty() {
            None
        } else {
            let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
            let segment = Segment::from_parts(id, self.dimension, kept, Vec::new(), Utc::now())?;
            self.storage.put(&segment_object_name(id), &codec::encode(&segment)?)?;
            Some(Arc::new(segment))
        };

        let compaction_epoch = {
            let mut guard = self.state.write();
            let state = Arc::make_mut(&mut guard);
            let mut segments: Vec<LiveSegment> =
                replacement.iter().cloned().map(LiveSegment::new).collect();
            segments.extend(
                state
                    .segments
                    .drain(..)
                    .filter(|live| !removed.contains(&live.segment.id())),
            );
            state.segments = segments;
            state.compaction_epoch += 1;
            state.compaction_epoch
        };
        self.write_manifest()?;

        for id in &removed {
            self.delete_segment_objects(*id);
        }

        info!(
            "Compacted {} segments into {:?}: kept {records_kept}, dropped {} \
             (epoch {compaction_epoch})",
            removed.len(),
            replacement.as_ref().map(|segment| segment.id()),
            total - records_kept
        );
        Ok(CompactionOutcome {
            segments_removed: removed,
            segment: replacement.map(|segment| segment.id()),
            records_kept,
            records_dropped: total - records_kept,
            compaction_epoch,
        })
    }

    pub fn stats(&self) -> StoreStats {
        let snapshot = self.snapshot();
        let segments = snapshot.segments();
        StoreStats {
            sealed_segments: segments.len(),
            frozen_buffers: snapshot.frozen.len(),
            sealed_slots: segments.iter().map(|live| live.segment.len()).sum(),
            buffered_records: snapshot.buffer.live_count(),
            buffered_bytes: snapshot.buffer.byte_size(),
            tombstones: segments
                .iter()
                .map(|live| live.segment.tombstones().len())
                .sum::<usize>()
                + snapshot.buffer.tombstone_count(),
            indexed_segments: segments.iter().filter(|live| live.index.is_some()).count(),
            compaction_epoch: snapshot.compaction_epoch,
        }
    }

    /// Delete every object this store owns. Later flushes, compactions and
    /// index installs are refused.
    pub fn destroy(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        self.destroyed.store(true, Ordering::SeqCst);
        for name in self.storage.list("")? {
            self.storage.delete(&name)?;
        }
        Ok(())
    }

    fn check_not_destroyed(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(QuiverError::not_found("Segment store has been deleted"));
        }
        Ok(())
    }

    fn delete_segment_objects(&self, id: SegmentId) {
        let name = segment_object_name(id);
        let stem = name.trim_end_matches("seg");
        match self.storage.list(stem) {
            Ok(names) => {
                for name in names {
                    if let Err(e) = self.storage.delete(&name) {
                        warn!("Failed to delete {name}: {e}");
                    }
                }
            }
            Err(e) => warn!("Failed to list objects of segment {id}: {e}"),
        }
    }

    fn write_manifest(&self) -> Result<()> {
        let _writing = self.manifest_lock.lock();
        let snapshot = self.snapshot();
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            segments: snapshot.segments.iter().map(LiveSegment::manifest_entry).collect(),
            next_segment_id: self.next_segment_id.load(Ordering::SeqCst),
            compaction_epoch: snapshot.compaction_epoch,
            last_write_seq: self.write_seq.load(Ordering::SeqCst),
            updated_at: Utc::now(),
        };
        manifest.save(self.storage.as_ref())
    }
}

fn load_ann(storage: &dyn Storage, segment: &Segment, kind: BackendKind) -> Result<AnnIndex> {
    let index = AnnIndex::from_bytes(&storage.get(&ann_object_name(segment.id(), kind))?)?;
    if index.kind() != kind {
        let found = index.kind();
        return Err(QuiverError::corrupt(format!("Expected a {kind} index, found {found}")));
    }
    if !index.is_exact() && index.len() != segment.len() {
        return Err(QuiverError::corrupt(format!(
            "Index covers {} offsets, segment has {}",
            index.len(),
            segment.len()
        )));
    }
    Ok(index)
}
