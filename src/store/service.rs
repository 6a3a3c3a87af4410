//! Cache Service Contract
//!
//! The distributed cache behind the store: batched get with asynchronous,
//! possibly-streaming delivery, and batched fire-and-forget modification.
//! The wire transport and eviction policy live behind this trait and are
//! not this crate's concern.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::namespace::CacheKey;
use crate::error::{Error, Result};

/// One delivery's worth of cache lookup results.
pub type CacheBatch = HashMap<CacheKey, Bytes>;

/// Consumer of a batched cache lookup.
///
/// Implementations may receive `on_partial` zero or more times, possibly
/// from concurrent shard delivery threads, before exactly one terminal
/// signal. `on_success` may carry a final batch for implementations that
/// deliver everything at once.
pub trait CacheReadSink: Send + Sync {
    /// A batch of hits arrived. Requested keys absent from every batch are
    /// cache misses, not errors.
    fn on_partial(&self, batch: CacheBatch);

    /// The lookup finished. `last` holds any hits not yet delivered.
    fn on_success(&self, last: CacheBatch);

    /// The lookup failed. No further signals follow.
    fn on_failure(&self, error: Error);
}

/// A single pending cache mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Store `value` under `key`.
    Put { key: CacheKey, value: Bytes },
    /// Drop `key` from the cache.
    Remove { key: CacheKey },
}

impl Change {
    /// Build a put change.
    pub fn put(key: CacheKey, value: Bytes) -> Self {
        Change::Put { key, value }
    }

    /// Build a remove change.
    pub fn remove(key: CacheKey) -> Self {
        Change::Remove { key }
    }

    /// The cache key this change applies to.
    pub fn key(&self) -> &CacheKey {
        match self {
            Change::Put { key, .. } => key,
            Change::Remove { key } => key,
        }
    }
}

/// Distributed cache client contract.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Batched lookup. Returns immediately; results reach `sink`
    /// asynchronously, possibly in several concurrent batches. Missing keys
    /// are simply not delivered.
    fn get(&self, keys: Vec<CacheKey>, sink: Arc<dyn CacheReadSink>);

    /// Batched mutation. Callers that don't need confirmation may ignore
    /// the result.
    async fn modify(&self, changes: Vec<Change>) -> Result<()>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory cache service for testing.
///
/// Uses DashMap for lock-free concurrent access. Lookup results are
/// delivered inline on the calling thread, split into a configurable number
/// of partial batches so accumulation across multiple deliveries gets
/// exercised; concurrent-delivery interleavings are the caller's job to
/// simulate.
pub struct MemCacheService {
    storage: DashMap<CacheKey, Bytes>,
    delivery_batches: usize,
    fail_reads: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
}

impl Default for MemCacheService {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            delivery_batches: 1,
            fail_reads: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            removes: AtomicU64::new(0),
        }
    }
}

impl MemCacheService {
    /// Create a new in-memory cache service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service that splits each lookup's hits into `batches`
    /// partial deliveries.
    pub fn with_batches(batches: usize) -> Self {
        Self {
            delivery_batches: batches.max(1),
            ..Self::default()
        }
    }

    /// Seed a raw entry, bypassing `modify`.
    pub fn insert(&self, key: CacheKey, value: Bytes) {
        self.storage.insert(key, value);
    }

    /// Whether the cache currently holds `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.storage.contains_key(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Make every subsequent lookup fail, to exercise failure propagation.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::Relaxed);
    }

    /// Number of lookup calls served.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of entries written through `modify`.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of entries removed through `modify`.
    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CacheService for MemCacheService {
    fn get(&self, keys: Vec<CacheKey>, sink: Arc<dyn CacheReadSink>) {
        self.reads.fetch_add(1, Ordering::Relaxed);

        if self.fail_reads.load(Ordering::Relaxed) {
            sink.on_failure(Error::storage("cache service unavailable"));
            return;
        }

        let hits: Vec<(CacheKey, Bytes)> = keys
            .into_iter()
            .filter_map(|key| {
                let value = self.storage.get(&key)?.clone();
                Some((key, value))
            })
            .collect();

        if !hits.is_empty() {
            let per_batch = hits.len().div_ceil(self.delivery_batches);
            for chunk in hits.chunks(per_batch) {
                sink.on_partial(chunk.iter().cloned().collect());
            }
        }
        sink.on_success(CacheBatch::new());
    }

    async fn modify(&self, changes: Vec<Change>) -> Result<()> {
        for change in changes {
            match change {
                Change::Put { key, value } => {
                    self.storage.insert(key, value);
                    self.writes.fetch_add(1, Ordering::Relaxed);
                }
                Change::Remove { key } => {
                    if self.storage.remove(&key).is_some() {
                        self.removes.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        Ok(())
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
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    fn cache_key(name: &[u8]) -> CacheKey {
        Namespace::Chunk.key(&ChunkKey::from_bytes(Bytes::copy_from_slice(name)))
    }

    #[derive(Default)]
    struct Recorder {
        partials: Mutex<Vec<CacheBatch>>,
        terminal: Mutex<Option<std::result::Result<CacheBatch, Error>>>,
    }

    impl CacheReadSink for Recorder {
        fn on_partial(&self, batch: CacheBatch) {
            self.partials.lock().push(batch);
        }

        fn on_success(&self, last: CacheBatch) {
            *self.terminal.lock() = Some(Ok(last));
        }

        fn on_failure(&self, error: Error) {
            *self.terminal.lock() = Some(Err(error));
        }
    }

    #[test]
    fn test_get_delivers_only_present_keys() {
        let service = MemCacheService::new();
        service.insert(cache_key(b"hit"), Bytes::from_static(b"value"));

        let recorder = Arc::new(Recorder::default());
        service.get(vec![cache_key(b"hit"), cache_key(b"miss")], recorder.clone());

        let partials = recorder.partials.lock();
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].len(), 1);
        assert_eq!(
            partials[0].get(&cache_key(b"hit")).unwrap().as_ref(),
            b"value"
        );
        assert_matches!(*recorder.terminal.lock(), Some(Ok(_)));
    }

    #[test]
    fn test_get_with_no_hits_still_terminates() {
        let service = MemCacheService::new();

        let recorder = Arc::new(Recorder::default());
        service.get(vec![cache_key(b"miss")], recorder.clone());

        assert!(recorder.partials.lock().is_empty());
        assert_matches!(*recorder.terminal.lock(), Some(Ok(_)));
    }

    #[test]
    fn test_batched_delivery_splits_hits() {
        let service = MemCacheService::with_batches(3);
        for i in 0..6u8 {
            service.insert(cache_key(&[i]), Bytes::copy_from_slice(&[i]));
        }

        let recorder = Arc::new(Recorder::default());
        service.get((0..6u8).map(|i| cache_key(&[i])).collect(), recorder.clone());

        let partials = recorder.partials.lock();
        assert_eq!(partials.len(), 3);
        let total: usize = partials.iter().map(CacheBatch::len).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_failed_reads_report_storage_error() {
        let service = MemCacheService::new();
        service.insert(cache_key(b"hit"), Bytes::from_static(b"value"));
        service.fail_reads();

        let recorder = Arc::new(Recorder::default());
        service.get(vec![cache_key(b"hit")], recorder.clone());

        assert!(recorder.partials.lock().is_empty());
        assert_matches!(*recorder.terminal.lock(), Some(Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_modify_applies_puts_and_removes() {
        let service = MemCacheService::new();

        service
            .modify(vec![
                Change::put(cache_key(b"a"), Bytes::from_static(b"1")),
                Change::put(cache_key(b"b"), Bytes::from_static(b"2")),
            ])
            .await
            .unwrap();
        assert_eq!(service.len(), 2);

        service
            .modify(vec![Change::remove(cache_key(b"a"))])
            .await
            .unwrap();
        assert!(!service.contains(&cache_key(b"a")));
        assert!(service.contains(&cache_key(b"b")));
        assert_eq!(service.writes(), 2);
        assert_eq!(service.removes(), 1);
    }

    #[test]
    fn test_change_key_accessor() {
        let key = cache_key(b"k");
        assert_eq!(Change::put(key.clone(), Bytes::new()).key(), &key);
        assert_eq!(Change::remove(key.clone()).key(), &key);
    }
}
