//! Fragment Metadata
//!
//! A chunk too large for a single record is split into fragments, each
//! stored as its own chunk. The metadata records the ordered fragment keys
//! so a reader can reassemble the whole. Metadata is only worth caching when
//! the chunk is actually fragmented.
//!
//! The byte representation is self-contained and uses the same tagged,
//! length-prefixed framing as the chunk record codec: tag 1 is a fragment
//! key, repeated in order; unknown tags are skipped.

use bytes::{Bytes, BytesMut};

use crate::chunk::ChunkKey;
use crate::codec::{segment_len, take_segment, write_segment, Segment};
use crate::error::{Error, Result};

/// Field tag for a fragment chunk key.
const TAG_FRAGMENT: u64 = 1;

/// Fragment metadata for a chunk (value object).
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    key: ChunkKey,
    fragments: Vec<ChunkKey>,
}

impl ChunkMeta {
    /// Create metadata for an unfragmented chunk.
    pub fn new(key: ChunkKey) -> Self {
        Self {
            key,
            fragments: Vec::new(),
        }
    }

    /// Create metadata for a chunk split into the given fragments, in order.
    pub fn fragmented(key: ChunkKey, fragments: Vec<ChunkKey>) -> Self {
        Self { key, fragments }
    }

    /// Key of the chunk this metadata describes.
    #[inline]
    pub fn key(&self) -> &ChunkKey {
        &self.key
    }

    /// Ordered keys of the chunk's fragments. Empty when unfragmented.
    #[inline]
    pub fn fragments(&self) -> &[ChunkKey] {
        &self.fragments
    }

    /// Number of fragments the chunk is split into. Zero for a chunk stored
    /// whole; such metadata is not cached.
    #[inline]
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Exact size of the encoded representation.
    pub fn encoded_len(&self) -> usize {
        self.fragments
            .iter()
            .map(|f| segment_len(TAG_FRAGMENT, f.len()))
            .sum()
    }

    /// Write the encoded representation into `buf`.
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        for fragment in &self.fragments {
            write_segment(buf, TAG_FRAGMENT, fragment.as_bytes());
        }
    }

    /// Encode to a freshly allocated buffer, sized exactly in one pass.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode metadata for `key` from its cached byte representation.
    ///
    /// Truncated framing is a corruption error; unknown tags are skipped.
    pub fn from_bytes(key: ChunkKey, raw: Bytes) -> Result<Self> {
        let mut buf = raw;
        let mut fragments = Vec::new();
        loop {
            match take_segment(&mut buf)
                .map_err(|reason| Error::corrupt(key.clone(), reason))?
            {
                Segment::End => break,
                Segment::Field { tag: TAG_FRAGMENT, bytes } => {
                    fragments.push(ChunkKey::from_bytes(bytes));
                }
                Segment::Field { .. } => {}
            }
        }
        Ok(Self { key, fragments })
    }
}

impl std::fmt::Debug for ChunkMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkMeta")
            .field("key", &self.key)
            .field("fragment_count", &self.fragment_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
