//! Binary segment format.
//!
//! ```text
//! header   magic "QVSG" | version u16 | id u64 | dimension u32
//!          | records u32 | tombstones u32 | created_at i64 (unix millis)
//! record   key | dimension x f32 | live u8 | metadata
//! metadata count u16, then per entry: key | tag u8 | value
//!          tag 0 = bool (u8), 1 = number (f64), 2 = string
//! tomb     key | segment_seq u64 | visible_as_of u64
//! trailer  crc32 of everything before it (u32)
//! ```
//!
//! Strings are a u32 byte length followed by UTF-8. All integers and floats
//! are little-endian.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::error::{QuiverError, Result};
use crate::vector::core::metadata::{Metadata, MetadataValue};
use crate::vector::core::record::{Tombstone, VectorRecord};
use crate::vector::index::VectorSource;
use crate::vector::segment::RecordSource;
use crate::vector::segment::sealed::Segment;

const MAGIC: &[u8; 4] = b"QVSG";
const FORMAT_VERSION: u16 = 1;

const TAG_BOOL: u8 = 0;
const TAG_NUMBER: u8 = 1;
const TAG_STRING: u8 = 2;

/// Sequential little-endian writer over an in-memory blob.
struct SegmentWriter {
    buf: Vec<u8>,
}

impl SegmentWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.buf.write_u8(value)?;
        Ok(())
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.buf.write_u16::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.buf.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_u64(&mut self, value: u64) -> Result<()> {
        self.buf.write_u64::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.buf.write_i64::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_f32(&mut self, value: f32) -> Result<()> {
        self.buf.write_f32::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_f64(&mut self, value: f64) -> Result<()> {
        self.buf.write_f64::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| QuiverError::validation("String too long to encode"))?;
        self.write_u32(len)?;
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn write_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        let count = u16::try_from(metadata.len())
            .map_err(|_| QuiverError::validation("Too many metadata entries to encode"))?;
        self.write_u16(count)?;
        for (key, value) in metadata {
            self.write_string(key)?;
            match value {
                MetadataValue::Bool(flag) => {
                    self.write_u8(TAG_BOOL)?;
                    self.write_u8(u8::from(*flag))?;
                }
                MetadataValue::Number(number) => {
                    self.write_u8(TAG_NUMBER)?;
                    self.write_f64(*number)?;
                }
                MetadataValue::String(text) => {
                    self.write_u8(TAG_STRING)?;
                    self.write_string(text)?;
                }
            }
        }
        Ok(())
    }

    /// Append the checksum trailer and return the blob.
    fn finish(mut self) -> Result<Vec<u8>> {
        let checksum = crc32fast::hash(&self.buf);
        self.write_u32(checksum)?;
        Ok(self.buf)
    }
}

/// Sequential reader; every short read is reported as corruption.
struct SegmentReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

fn truncated(e: std::io::Error) -> QuiverError {
    QuiverError::corrupt(format!("Truncated segment: {e}"))
}

impl<'a> SegmentReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(truncated)
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(truncated)
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(truncated)
    }

    fn read_u64(&mut self) -> Result<u64> {
        self.cursor.read_u64::<LittleEndian>().map_err(truncated)
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.cursor.read_i64::<LittleEndian>().map_err(truncated)
    }

    fn read_f32(&mut self) -> Result<f32> {
        self.cursor.read_f32::<LittleEndian>().map_err(truncated)
    }

    fn read_f64(&mut self) -> Result<f64> {
        self.cursor.read_f64::<LittleEndian>().map_err(truncated)
    }

    fn remaining(&self) -> usize {
        let data = self.cursor.get_ref();
        data.len().saturating_sub(self.cursor.position() as usize)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(QuiverError::corrupt(format!("String length {len} exceeds segment size")));
        }
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes).map_err(truncated)?;
        String::from_utf8(bytes)
            .map_err(|e| QuiverError::corrupt(format!("Invalid UTF-8 in segment: {e}")))
    }

    fn read_metadata(&mut self) -> Result<Metadata> {
        let count = self.read_u16()?;
        let mut metadata = Metadata::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let value = match self.read_u8()? {
                TAG_BOOL => MetadataValue::Bool(self.read_u8()? != 0),
                TAG_NUMBER => MetadataValue::Number(self.read_f64()?),
                TAG_STRING => MetadataValue::String(self.read_string()?),
                tag => return Err(QuiverError::corrupt(format!("Unknown metadata tag {tag}"))),
            };
            metadata.insert(key, value);
        }
        Ok(metadata)
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| QuiverError::validation(format!("Segment has too many {what}")))
}

/// Serialize a sealed segment.
pub fn encode(segment: &Segment) -> Result<Vec<u8>> {
    let mut writer = SegmentWriter::with_capacity(64 + segment.byte_size());

    writer.buf.extend_from_slice(MAGIC);
    writer.write_u16(FORMAT_VERSION)?;
    writer.write_u64(segment.id())?;
    writer.write_u32(to_u32(segment.dimension(), "dimensions")?)?;
    writer.write_u32(to_u32(segment.len(), "records")?)?;
    writer.write_u32(to_u32(segment.tombstones().len(), "tombstones")?)?;
    writer.write_i64(segment.created_at().timestamp_millis())?;

    for offset in 0..segment.len() as u32 {
        writer.write_string(segment.key(offset))?;
        for &value in segment.vector(offset) {
            writer.write_f32(value)?;
        }
        writer.write_u8(u8::from(segment.is_live(offset)))?;
        writer.write_metadata(segment.metadata(offset))?;
    }

    for tombstone in segment.tombstones() {
        writer.write_string(&tombstone.key)?;
        writer.write_u64(tombstone.segment_seq)?;
        writer.write_u64(tombstone.visible_as_of)?;
    }

    writer.finish()
}

/// Parse and verify a segment blob.
pub fn decode(data: &[u8]) -> Result<Segment> {
    if data.len() < MAGIC.len() + 4 {
        return Err(QuiverError::corrupt("Segment blob too short"));
    }
    let (body, trailer) = data.split_at(data.len() - 4);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(QuiverError::corrupt(format!(
            "Segment checksum mismatch: stored {expected:08x}, computed {actual:08x}"
        )));
    }
    if &body[..MAGIC.len()] != MAGIC {
        return Err(QuiverError::corrupt("Not a segment blob"));
    }

    let mut reader = SegmentReader::new(&body[MAGIC.len()..]);
    let version = reader.read_u16()?;
    if version != FORMAT_VERSION {
        return Err(QuiverError::corrupt(format!("Unsupported segment format version {version}")));
    }
    let id = reader.read_u64()?;
    let dimension = reader.read_u32()? as usize;
    let record_count = reader.read_u32()? as usize;
    let tombstone_count = reader.read_u32()? as usize;
    let created_at = DateTime::<Utc>::from_timestamp_millis(reader.read_i64()?)
        .ok_or_else(|| QuiverError::corrupt("Segment timestamp out of range"))?;

    // Each record needs at least its key length, vector, live flag and metadata count.
    let min_record = 4 + dimension * 4 + 1 + 2;
    if record_count.saturating_mul(min_record) > reader.remaining() {
        return Err(QuiverError::corrupt(format!(
            "Segment claims {record_count} records but only {} bytes remain",
            reader.remaining()
        )));
    }

    let mut records = Vec::with_capacity(record_count);
    for _ in 0..record_count {
        let key = reader.read_string()?;
        let mut vector = Vec::with_capacity(dimension);
        for _ in 0..dimension {
            vector.push(reader.read_f32()?);
        }
        let live = reader.read_u8()? != 0;
        let metadata = reader.read_metadata()?;
        records.push((
            VectorRecord {
                key,
                vector,
                metadata,
            },
            live,
        ));
    }

    let mut tombstones = Vec::with_capacity(tombstone_count.min(reader.remaining() / 20));
    for _ in 0..tombstone_count {
        tombstones.push(Tombstone {
            key: reader.read_string()?,
            segment_seq: reader.read_u64()?,
            visible_as_of: reader.read_u64()?,
        });
    }

    if reader.remaining() != 0 {
        return Err(QuiverError::corrupt(format!(
            "{} trailing bytes after segment body",
            reader.remaining()
        )));
    }

    Segment::from_parts(id, dimension, records, tombstones, created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::segment::buffer::WriteBuffer;

    fn sample() -> Segment {
        let mut buffer = WriteBuffer::new(42, 3);
        buffer.append(
            VectorRecord::new("alpha", vec![0.5, -1.0, 2.25])
                .with_field("genre", "jazz")
                .with_field("year", 1959)
                .with_field("live", true),
        );
        buffer.append(VectorRecord::new("beta", vec![1.0, 1.0, 1.0]));
        buffer.append(VectorRecord::new("gamma", vec![0.0, 0.0, 0.0]));
        buffer.delete("beta", 4);
        buffer.delete("older", 5);
        Segment::from_buffer(&buffer)
    }

    #[test]
    fn test_decode_restores_segment() {
        let segment = sample();
        let decoded = decode(&encode(&segment).unwrap()).unwrap();

        assert_eq!(decoded.id(), 42);
        assert_eq!(decoded.dimension(), 3);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.live_count(), 2);
        assert!(!decoded.is_live(1));
        assert_eq!(decoded.record(0), segment.record(0));
        assert_eq!(decoded.tombstones(), segment.tombstones());
        assert_eq!(
            decoded.created_at().timestamp_millis(),
            segment.created_at().timestamp_millis()
        );
    }

    #[test]
    fn test_detects_bit_flip() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[20] ^= 0x10;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, QuiverError::Corrupt(_)));
    }

    #[test]
    fn test_rejects_truncated_and_foreign_blobs() {
        let bytes = encode(&sample()).unwrap();
        assert!(matches!(decode(&bytes[..10]), Err(QuiverError::Corrupt(_))));
        assert!(matches!(decode(b"nope"), Err(QuiverError::Corrupt(_))));

        let mut foreign = b"JUNKJUNKJUNK".to_vec();
        let checksum = crc32fast::hash(&foreign);
        foreign.extend_from_slice(&checksum.to_le_bytes());
        assert!(matches!(decode(&foreign), Err(QuiverError::Corrupt(_))));
    }

    #[test]
    fn test_empty_segment_with_tombstones_only() {
        let mut buffer = WriteBuffer::new(7, 16);
        buffer.delete("gone", 1);
        let segment = Segment::from_buffer(&buffer);
        let decoded = decode(&encode(&segment).unwrap()).unwrap();
        assert_eq!(decoded.len(), 0);
        assert!(decoded.has_tombstone("gone"));
    }
}
