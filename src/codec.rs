//! Chunk Record Codec
//!
//! Encodes the up-to-three optional byte segments of a chunk record into one
//! compact binary record, and decodes it back.
//!
//! # Wire format
//!
//! A record is a sequence of tagged, length-prefixed segments:
//!
//! ```text
//! record  := segment* (tag-0 | EOF)
//! segment := uvarint tag, uvarint length, length bytes
//! ```
//!
//! - tag 1 = chunk data bytes
//! - tag 2 = chunk index bytes
//! - tag 3 = encoded fragment metadata
//!
//! Absent segments are omitted entirely; an empty-but-present segment is
//! emitted with length 0, so absent and empty survive a round trip as
//! distinct states. Tags outside {1, 2, 3} are skipped by consuming their
//! declared length, never rejected, so newer writers stay readable.
//!
//! # Encoding discipline
//!
//! Chunk bodies run to megabytes, so the encoder sizes the record exactly
//! first and fills a single allocation second. Decoding slices the input
//! buffer zero-copy and performs no I/O.

use bytes::{Buf, Bytes, BytesMut};

use crate::chunk::{ChunkKey, ChunkRecord};
use crate::error::{Error, Result};
use crate::meta::ChunkMeta;

/// Field tag for the chunk data segment.
const TAG_DATA: u64 = 1;
/// Field tag for the chunk index segment.
const TAG_INDEX: u64 = 2;
/// Field tag for the fragment metadata segment.
const TAG_META: u64 = 3;

// =============================================================================
// Varint framing
// =============================================================================

/// Number of bytes an unsigned LEB128 varint occupies.
pub(crate) fn uvarint_len(mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}

/// Append an unsigned LEB128 varint.
pub(crate) fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.extend_from_slice(&[(value as u8) | 0x80]);
        value >>= 7;
    }
    buf.extend_from_slice(&[value as u8]);
}

/// Read an unsigned LEB128 varint, advancing `buf` past it.
fn take_uvarint(buf: &mut Bytes) -> Option<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        if buf.is_empty() || shift >= 64 {
            return None;
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
}

/// Exact encoded size of one segment.
pub(crate) fn segment_len(tag: u64, len: usize) -> usize {
    uvarint_len(tag) + uvarint_len(len as u64) + len
}

/// Append one segment's tag and length prefix.
pub(crate) fn write_segment_header(buf: &mut BytesMut, tag: u64, len: usize) {
    put_uvarint(buf, tag);
    put_uvarint(buf, len as u64);
}

/// Append one complete segment.
pub(crate) fn write_segment(buf: &mut BytesMut, tag: u64, bytes: &[u8]) {
    write_segment_header(buf, tag, bytes.len());
    buf.extend_from_slice(bytes);
}

/// One step of segment iteration.
pub(crate) enum Segment {
    /// Tag 0 or end of buffer.
    End,
    /// A tagged field; `bytes` is a zero-copy slice of the input.
    Field { tag: u64, bytes: Bytes },
}

/// Take the next segment off the front of `buf`.
///
/// Errors carry only the reason; callers attach the chunk key.
pub(crate) fn take_segment(buf: &mut Bytes) -> std::result::Result<Segment, String> {
    if buf.is_empty() {
        return Ok(Segment::End);
    }
    let tag = take_uvarint(buf).ok_or("truncated segment tag")?;
    if tag == 0 {
        return Ok(Segment::End);
    }
    let len = take_uvarint(buf).ok_or("truncated segment length")?;
    let len = usize::try_from(len).map_err(|_| "segment length overflows usize".to_string())?;
    if len > buf.len() {
        return Err(format!(
            "segment length {} exceeds remaining {} bytes",
            len,
            buf.len()
        ));
    }
    let bytes = buf.split_to(len);
    Ok(Segment::Field { tag, bytes })
}

// =============================================================================
// Record encode/decode
// =============================================================================

/// Exact size `encode` will produce for this record.
pub fn encoded_len(record: &ChunkRecord) -> usize {
    let mut n = 0;
    if let Some(data) = record.data() {
        n += segment_len(TAG_DATA, data.len());
    }
    if let Some(index) = record.index() {
        n += segment_len(TAG_INDEX, index.len());
    }
    if let Some(meta) = record.meta() {
        n += segment_len(TAG_META, meta.encoded_len());
    }
    n
}

/// Serialize a record's present segments into one buffer.
///
/// Sizes the output exactly first, then fills a single allocation.
pub fn encode(record: &ChunkRecord) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(record));
    if let Some(data) = record.data() {
        write_segment(&mut buf, TAG_DATA, data);
    }
    if let Some(index) = record.index() {
        write_segment(&mut buf, TAG_INDEX, index);
    }
    if let Some(meta) = record.meta() {
        write_segment_header(&mut buf, TAG_META, meta.encoded_len());
        meta.encode_into(&mut buf);
    }
    debug_assert_eq!(buf.len(), encoded_len(record));
    buf.freeze()
}

/// Deserialize a record for `key` from its cached byte representation.
///
/// Never mutates the input; segments are zero-copy slices of it. Truncated
/// framing is a corruption error, surfaced loudly rather than papered over.
pub fn decode(key: ChunkKey, raw: Bytes) -> Result<ChunkRecord> {
    let mut buf = raw;
    let mut record = ChunkRecord::new(key.clone());
    loop {
        match take_segment(&mut buf).map_err(|reason| Error::corrupt(key.clone(), reason))? {
            Segment::End => return Ok(record),
            Segment::Field { tag: TAG_DATA, bytes } => {
                record = record.with_data(bytes);
            }
            Segment::Field { tag: TAG_INDEX, bytes } => {
                record = record.with_index(bytes);
            }
            Segment::Field { tag: TAG_META, bytes } => {
                record = record.with_meta(ChunkMeta::from_bytes(key.clone(), bytes)?);
            }
            Segment::Field { .. } => {}
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
