//! Cache Key Namespacing
//!
//! The cache exposes one flat byte-key space. Chunk payloads and chunk
//! metadata for the same chunk must not collide there, so each logical
//! category prefixes its keys with a distinct tag. The mapping is pure and
//! injective, and because the orchestrator always knows which namespace it
//! queried, the original chunk key is recovered by stripping the known
//! prefix.

use bytes::{Bytes, BytesMut};

use crate::chunk::ChunkKey;

/// Logical category partitioning the flat cache key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Full chunk payload records.
    Chunk,
    /// Fragment metadata records.
    ChunkMeta,
}

impl Namespace {
    /// Prefix bytes for this namespace. Prefixes are equal-length and
    /// distinct, so the two namespaces never collide.
    #[inline]
    pub const fn prefix(self) -> &'static [u8] {
        match self {
            Namespace::Chunk => b"c.",
            Namespace::ChunkMeta => b"m.",
        }
    }

    /// Map a chunk key into this namespace's region of the cache key space.
    pub fn key(self, key: &ChunkKey) -> CacheKey {
        let prefix = self.prefix();
        let mut buf = BytesMut::with_capacity(prefix.len() + key.len());
        buf.extend_from_slice(prefix);
        buf.extend_from_slice(key.as_bytes());
        CacheKey(buf.freeze())
    }

    /// Recover the chunk key a cache key was derived from.
    ///
    /// Callers must pass the namespace the key was created under; the
    /// orchestrator always knows it, since it chose it for the lookup.
    pub fn recover(self, key: &CacheKey) -> ChunkKey {
        let prefix = self.prefix();
        debug_assert!(key.0.starts_with(prefix));
        ChunkKey::from_bytes(key.0.slice(prefix.len()..))
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Namespace::Chunk => write!(f, "chunk"),
            Namespace::ChunkMeta => write!(f, "chunk-meta"),
        }
    }
}

/// Namespaced flat byte key used for cache lookups (value object).
///
/// Derived deterministically from a (namespace, chunk key) pair; never
/// stored independently.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Bytes);

impl CacheKey {
    /// Get the raw namespaced key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheKey(")?;
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_key(bytes: &[u8]) -> ChunkKey {
        ChunkKey::from_bytes(Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn test_namespaces_never_collide() {
        let key = chunk_key(b"same-chunk");
        assert_ne!(Namespace::Chunk.key(&key), Namespace::ChunkMeta.key(&key));
    }

    #[test]
    fn test_distinct_keys_stay_distinct() {
        let a = Namespace::Chunk.key(&chunk_key(b"aa"));
        let b = Namespace::Chunk.key(&chunk_key(b"ab"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let key = chunk_key(b"chunk-9");
        assert_eq!(Namespace::Chunk.key(&key), Namespace::Chunk.key(&key));
    }

    #[test]
    fn test_recover_round_trip() {
        let key = chunk_key(b"chunk-42");
        for ns in [Namespace::Chunk, Namespace::ChunkMeta] {
            assert_eq!(ns.recover(&ns.key(&key)), key);
        }
    }

    #[test]
    fn test_prefix_is_visible_in_key_bytes() {
        let cache_key = Namespace::ChunkMeta.key(&chunk_key(b"k"));
        assert!(cache_key.as_bytes().starts_with(b"m."));
    }
}
