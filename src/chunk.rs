//! Chunk Identity and Record Types
//!
//! A chunk is a content-addressed, immutable unit of binary data. Its key is
//! produced by upstream content addressing and treated here as an opaque,
//! byte-comparable value. A chunk record carries up to three optional
//! payload segments alongside the key.

use bytes::Bytes;

use crate::meta::ChunkMeta;

/// Opaque, immutable identifier of a chunk (value object).
///
/// Cheap to clone; the underlying bytes are shared, never copied.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey(Bytes);

impl ChunkKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Get the raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkKey({})", self)
    }
}

impl From<&[u8]> for ChunkKey {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

/// In-memory representation of a chunk's payload segments.
///
/// At least the key is always present; any of the three segments may be
/// absent. A record is owned exclusively by the call that constructed it:
/// decoded fresh per read, supplied fresh per write.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    key: ChunkKey,
    data: Option<Bytes>,
    index: Option<Bytes>,
    meta: Option<ChunkMeta>,
}

impl ChunkRecord {
    /// Create an empty record for the given key.
    pub fn new(key: ChunkKey) -> Self {
        Self {
            key,
            data: None,
            index: None,
            meta: None,
        }
    }

    /// Set the chunk data segment.
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the chunk index segment.
    pub fn with_index(mut self, index: impl Into<Bytes>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Set the fragment metadata.
    pub fn with_meta(mut self, meta: ChunkMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Get the chunk key.
    #[inline]
    pub fn key(&self) -> &ChunkKey {
        &self.key
    }

    /// Get the chunk data segment, if present.
    #[inline]
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Get the chunk index segment, if present.
    #[inline]
    pub fn index(&self) -> Option<&Bytes> {
        self.index.as_ref()
    }

    /// Get the fragment metadata, if present.
    #[inline]
    pub fn meta(&self) -> Option<&ChunkMeta> {
        self.meta.as_ref()
    }

    /// Whether the record carries a data payload. A record without one is a
    /// tombstone/placeholder write.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

impl std::fmt::Debug for ChunkRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRecord")
            .field("key", &self.key)
            .field("data_len", &self.data.as_ref().map(Bytes::len))
            .field("index_len", &self.index.as_ref().map(Bytes::len))
            .field("fragments", &self.meta.as_ref().map(ChunkMeta::fragment_count))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
