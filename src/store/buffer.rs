//! Write Buffering
//!
//! Mutations against the store are not applied one by one; the caller's
//! surrounding transaction accumulates them in a buffer and flushes the
//! batch at its own boundary. The backing table stages its writes in its
//! own buffer behind the [`WriteBuffer`] trait; [`CacheBuffer`] wraps that
//! buffer and additionally stages the cache-side changes, so one flush
//! settles both stores.

use std::sync::Arc;

use bytes::Bytes;

use super::namespace::CacheKey;
use super::service::{CacheService, Change};
use crate::error::Result;

/// Backing store's batch of pending mutations.
///
/// Implementations may block on I/O inside `flush`.
pub trait WriteBuffer: Send {
    /// Apply everything staged in this buffer.
    fn flush(&mut self) -> Result<()>;

    /// Discard everything staged.
    fn abort(&mut self) -> Result<()>;
}

/// No-op buffer for backing tables that apply mutations immediately
/// (testing).
#[derive(Debug, Default)]
pub struct NoopWriteBuffer;

impl WriteBuffer for NoopWriteBuffer {
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Caller-scoped batch of pending mutations against cache and backing
/// store.
///
/// The store core only appends to this; the caller flushes. Backing-store
/// mutations go through the wrapped [`WriteBuffer`], cache mutations are
/// staged as [`Change`]s. Removals staged with [`CacheBuffer::remove_after_flush`]
/// are applied only after the staged changes, so a tombstone's removal
/// cannot be overtaken by an earlier staged write of the same key.
pub struct CacheBuffer {
    client: Arc<dyn CacheService>,
    db: Box<dyn WriteBuffer>,
    pending: Vec<Change>,
    deferred_removes: Vec<CacheKey>,
}

impl CacheBuffer {
    /// Wrap the backing store's buffer for the given cache client.
    pub fn new(client: Arc<dyn CacheService>, db: Box<dyn WriteBuffer>) -> Self {
        Self {
            client,
            db,
            pending: Vec::new(),
            deferred_removes: Vec::new(),
        }
    }

    /// Stage a cache write.
    pub fn put(&mut self, key: CacheKey, value: Bytes) {
        self.pending.push(Change::put(key, value));
    }

    /// Stage a cache removal, applied with the batch.
    pub fn remove(&mut self, key: CacheKey) {
        self.pending.push(Change::remove(key));
    }

    /// Stage a cache removal applied only after the batch has flushed.
    pub fn remove_after_flush(&mut self, key: CacheKey) {
        self.deferred_removes.push(key);
    }

    /// The backing store's own buffer, for handing to its put/remove.
    pub fn db_buffer(&mut self) -> &mut dyn WriteBuffer {
        self.db.as_mut()
    }

    /// Changes staged against the cache, in staging order.
    pub fn pending(&self) -> &[Change] {
        &self.pending
    }

    /// Removals deferred until after the flush of staged changes.
    pub fn deferred_removals(&self) -> &[CacheKey] {
        &self.deferred_removes
    }

    /// Flush the backing store's buffer, then the staged cache changes,
    /// then the deferred removals.
    ///
    /// The backing store settles first: a crash between the two flushes
    /// costs a future cache miss, never a cache hit for data the backing
    /// store doesn't have.
    pub async fn flush(&mut self) -> Result<()> {
        self.db.flush()?;

        let changes = std::mem::take(&mut self.pending);
        if !changes.is_empty() {
            self.client.modify(changes).await?;
        }

        let removes: Vec<Change> = std::mem::take(&mut self.deferred_removes)
            .into_iter()
            .map(Change::remove)
            .collect();
        if !removes.is_empty() {
            self.client.modify(removes).await?;
        }
        Ok(())
    }

    /// Discard everything staged, cache side and backing side.
    pub fn abort(&mut self) -> Result<()> {
        self.pending.clear();
        self.deferred_removes.clear();
        self.db.abort()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKey;
    use crate::store::namespace::Namespace;
    use crate::store::service::MemCacheService;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn cache_key(name: &[u8]) -> CacheKey {
        Namespace::Chunk.key(&ChunkKey::from_bytes(Bytes::copy_from_slice(name)))
    }

    /// Records flush/abort calls so ordering can be asserted.
    #[derive(Default)]
    struct CountingBuffer {
        flushes: Arc<AtomicU64>,
        aborts: Arc<AtomicU64>,
    }

    impl WriteBuffer for CountingBuffer {
        fn flush(&mut self) -> Result<()> {
            self.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn abort(&mut self) -> Result<()> {
            self.aborts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_staging_is_observable() {
        let client = Arc::new(MemCacheService::new());
        let mut buf = CacheBuffer::new(client, Box::new(NoopWriteBuffer));

        buf.put(cache_key(b"a"), Bytes::from_static(b"1"));
        buf.remove(cache_key(b"b"));
        buf.remove_after_flush(cache_key(b"c"));

        assert_eq!(buf.pending().len(), 2);
        assert_eq!(buf.deferred_removals(), &[cache_key(b"c")]);
    }

    #[tokio::test]
    async fn test_flush_applies_changes_then_deferred_removes() {
        let client = Arc::new(MemCacheService::new());
        let flushes = Arc::new(AtomicU64::new(0));
        let db = CountingBuffer {
            flushes: flushes.clone(),
            ..CountingBuffer::default()
        };
        let mut buf = CacheBuffer::new(client.clone(), Box::new(db));

        // The deferred removal targets a key also written in this batch; it
        // must win.
        buf.put(cache_key(b"tombstone"), Bytes::from_static(b"stale"));
        buf.put(cache_key(b"kept"), Bytes::from_static(b"fresh"));
        buf.remove_after_flush(cache_key(b"tombstone"));

        buf.flush().await.unwrap();

        assert_eq!(flushes.load(Ordering::Relaxed), 1);
        assert!(client.contains(&cache_key(b"kept")));
        assert!(!client.contains(&cache_key(b"tombstone")));
        assert!(buf.pending().is_empty());
        assert!(buf.deferred_removals().is_empty());
    }

    #[tokio::test]
    async fn test_flush_with_nothing_staged_is_quiet() {
        let client = Arc::new(MemCacheService::new());
        let mut buf = CacheBuffer::new(client.clone(), Box::new(NoopWriteBuffer));

        buf.flush().await.unwrap();
        assert_eq!(client.writes(), 0);
    }

    #[tokio::test]
    async fn test_abort_discards_staged_changes() {
        let client = Arc::new(MemCacheService::new());
        let aborts = Arc::new(AtomicU64::new(0));
        let db = CountingBuffer {
            aborts: aborts.clone(),
            ..CountingBuffer::default()
        };
        let mut buf = CacheBuffer::new(client.clone(), Box::new(db));

        buf.put(cache_key(b"a"), Bytes::from_static(b"1"));
        buf.abort().unwrap();

        assert!(buf.pending().is_empty());
        assert_eq!(aborts.load(Ordering::Relaxed), 1);

        buf.flush().await.unwrap();
        assert!(!client.contains(&cache_key(b"a")));
    }
}
