//! Paginated listing of visible vectors.
//!
//! A page token encodes the compaction epoch it was issued under and the
//! `(segment_id, offset)` of the next slot to read. Segment ids and offsets
//! survive flushes, so a token stays valid until the next compaction.

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::vector::core::metadata::Metadata;
use crate::vector::core::record::SegmentId;
use crate::vector::segment::RecordSource;
use crate::vector::segment::store::{StoreState, is_visible};

/// Upper bound on `segment_count` for partitioned listing.
pub const MAX_LIST_SEGMENTS: u32 = 16;

/// Hex digits of a token: epoch and segment id as 16 each, offset as 8.
const TOKEN_LEN: usize = 40;

/// Decoded form of a page token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub compaction_epoch: u64,
    pub segment_id: SegmentId,
    pub offset: u32,
}

impl PageCursor {
    pub fn encode(&self) -> String {
        format!("{:016x}{:016x}{:08x}", self.compaction_epoch, self.segment_id, self.offset)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let malformed =
            || QuiverError::validation(format!("Malformed pagination token: {token:?}"));
        if token.len() != TOKEN_LEN || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        let field = |digits: &str| u64::from_str_radix(digits, 16).map_err(|_| malformed());
        let offset = u32::from_str_radix(&token[32..], 16).map_err(|_| malformed())?;
        Ok(PageCursor {
            compaction_epoch: field(&token[..16])?,
            segment_id: field(&token[16..32])?,
            offset,
        })
    }
}

/// Arguments of a ListVectors call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListVectorsRequest {
    /// Token returned by the previous page.
    pub cursor: Option<String>,
    /// Records per page; the configured maximum when absent.
    pub page_size: Option<usize>,
    /// Split the key space into this many disjoint partitions.
    pub segment_count: Option<u32>,
    /// Partition listed by this call, in `0..segment_count`.
    pub segment_index: Option<u32>,
    pub include_vector: bool,
    pub include_metadata: bool,
}

impl ListVectorsRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_partition(mut self, segment_index: u32, segment_count: u32) -> Self {
        self.segment_index = Some(segment_index);
        self.segment_count = Some(segment_count);
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

    fn partition(&self) -> Result<Option<(u32, u32)>> {
        match (self.segment_index, self.segment_count) {
            (None, None) => Ok(None),
            (Some(index), Some(count)) => {
                if count == 0 || count > MAX_LIST_SEGMENTS {
                    return Err(QuiverError::validation(format!(
                        "segment_count must be between 1 and {MAX_LIST_SEGMENTS}"
                    )));
                }
                if index >= count {
                    return Err(QuiverError::validation(format!(
                        "segment_index must be less than segment_count ({count})"
                    )));
                }
                Ok(Some((index, count)))
            }
            _ => Err(QuiverError::validation(
                "segment_index and segment_count must be given together",
            )),
        }
    }
}

/// One record returned by listing or point lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl VectorEntry {
    pub(crate) fn from_source(
        records: &dyn RecordSource,
        offset: u32,
        include_vector: bool,
        include_metadata: bool,
    ) -> Self {
        Self {
            key: records.key(offset).to_string(),
            vector: include_vector.then(|| records.vector(offset).to_vec()),
            metadata: include_metadata.then(|| records.metadata(offset).clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListVectorsPage {
    pub vectors: Vec<VectorEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Read one page of visible records from `snapshot`.
///
/// `max_page` caps and defaults the page size.
pub fn list_page(
    snapshot: &StoreState,
    request: &ListVectorsRequest,
    max_page: usize,
) -> Result<ListVectorsPage> {
    let page_size = request.page_size.unwrap_or(max_page);
    if page_size == 0 || page_size > max_page {
        return Err(QuiverError::validation(format!(
            "page_size must be between 1 and {max_page}"
        )));
    }
    let partition = request.partition()?;
    let sources = snapshot.sources();
    let epoch = snapshot.compaction_epoch();

    let (start_position, start_offset) = match &request.cursor {
        None => (0, 0),
        Some(token) => {
            let cursor = PageCursor::decode(token)?;
            if cursor.compaction_epoch != epoch {
                return Err(QuiverError::cursor_expired(
                    "The index was compacted since this token was issued",
                ));
            }
            let position = sources
                .iter()
                .position(|source| source.id() == cursor.segment_id)
                .ok_or_else(|| {
                    let id = cursor.segment_id;
                    QuiverError::cursor_expired(format!("Segment {id} no longer exists"))
                })?;
            (position, cursor.offset)
        }
    };

    let mut vectors = Vec::with_capacity(page_size.min(256));
    for position in start_position..sources.len() {
        let records = sources[position].records();
        let first = if position == start_position { start_offset } else { 0 };
        for offset in first..records.len() as u32 {
            if !is_visible(&sources, position, offset) {
                continue;
            }
            if let Some((index, count)) = partition {
                if crc32fast::hash(records.key(offset).as_bytes()) % count != index {
                    continue;
                }
            }
            if vectors.len() == page_size {
                let next = PageCursor {
                    compaction_epoch: epoch,
                    segment_id: records.id(),
                    offset,
                };
                return Ok(ListVectorsPage {
                    vectors,
                    next_cursor: Some(next.encode()),
                });
            }
            vectors.push(VectorEntry::from_source(
                records,
                offset,
                request.include_vector,
                request.include_metadata,
            ));
        }
    }

    Ok(ListVectorsPage {
        vectors,
        next_cursor: None,
    })
}
