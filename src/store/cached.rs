//! Cache-Aside Store
//!
//! The core of the tier: a store with the same surface as the backing
//! table that consults the cache first and keeps it populated behind the
//! callers' backs.
//!
//! # Read path
//!
//! ```text
//! caller ──► CachedChunkTable::get ──► CacheService::get (namespaced keys)
//!                                            │
//!                              partial batches, possibly concurrent
//!                                            ▼
//!                                  decode + stream/accumulate
//!                                            │
//!                         all found, or fast mode ──► terminal success
//!                                            │
//!                             still missing, authoritative mode
//!                                            ▼
//!                            ChunkTable::get (remaining keys only)
//!                                            │
//!                          forward to caller ┴ re-encode + write back
//!                                              (background executor)
//! ```
//!
//! Each logical read owns one accumulator; its remaining-key set and result
//! list are the only shared mutable state and are guarded by a single lock
//! held per-update, never across an I/O-issuing call. The terminal signal
//! fires exactly once.
//!
//! # Failure policy
//!
//! A cache failure fails the call; only genuine misses fall through to the
//! backing table. Backing-table failures propagate. Write-back failures are
//! swallowed, they only cost future hit rate.

use std::collections::HashSet;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::buffer::{CacheBuffer, WriteBuffer};
use super::namespace::Namespace;
use super::service::{CacheBatch, CacheReadSink, CacheService, Change};
use super::sink::{Completion, ReadSink, StreamingCompletion};
use super::table::{ChunkTable, Context};
use crate::chunk::{ChunkKey, ChunkRecord};
use crate::codec;
use crate::error::{Error, Result};
use crate::meta::ChunkMeta;

// =============================================================================
// Read kinds
// =============================================================================

/// The two read paths differ only in namespace, item type, codec, and which
/// backing-table call resolves misses. One marker per path keeps the
/// accumulators generic.
trait ReadKind: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// Namespace this kind's cache entries live under.
    const NS: Namespace;

    /// Decode a cached value for `key`.
    fn decode(key: ChunkKey, raw: Bytes) -> Result<Self::Item>;

    /// Key of a decoded item.
    fn chunk_key(item: &Self::Item) -> &ChunkKey;

    /// Bytes to cache for an item during write-back.
    fn cache_bytes(item: &Self::Item) -> Bytes;

    /// Resolve `keys` from the backing table.
    fn consult(db: &dyn ChunkTable, ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<Self::Item>);
}

enum ChunkRead {}

impl ReadKind for ChunkRead {
    type Item = ChunkRecord;

    const NS: Namespace = Namespace::Chunk;

    fn decode(key: ChunkKey, raw: Bytes) -> Result<ChunkRecord> {
        codec::decode(key, raw)
    }

    fn chunk_key(item: &ChunkRecord) -> &ChunkKey {
        item.key()
    }

    fn cache_bytes(item: &ChunkRecord) -> Bytes {
        codec::encode(item)
    }

    fn consult(db: &dyn ChunkTable, ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<ChunkRecord>) {
        db.get(ctx, keys, sink);
    }
}

enum MetaRead {}

impl ReadKind for MetaRead {
    type Item = ChunkMeta;

    const NS: Namespace = Namespace::ChunkMeta;

    fn decode(key: ChunkKey, raw: Bytes) -> Result<ChunkMeta> {
        ChunkMeta::from_bytes(key, raw)
    }

    fn chunk_key(item: &ChunkMeta) -> &ChunkKey {
        item.key()
    }

    fn cache_bytes(item: &ChunkMeta) -> Bytes {
        item.to_bytes()
    }

    fn consult(db: &dyn ChunkTable, ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<ChunkMeta>) {
        db.get_meta(ctx, keys, sink);
    }
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Default)]
struct StatCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    write_backs: AtomicU64,
}

/// Point-in-time snapshot of the store's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Keys resolved from the cache.
    pub cache_hits: u64,
    /// Keys the cache could not resolve.
    pub cache_misses: u64,
    /// Backing-store results scheduled for cache repopulation.
    pub write_backs: u64,
    /// Hit ratio (0.0 - 1.0).
    pub hit_ratio: f64,
}

// =============================================================================
// Store
// =============================================================================

struct Inner {
    db: Arc<dyn ChunkTable>,
    client: Arc<dyn CacheService>,
    executor: Handle,
    stats: StatCounters,
}

/// Cache-aside wrapper with the backing table's get/get_meta/put/remove
/// surface.
pub struct CachedChunkTable {
    inner: Arc<Inner>,
}

impl CachedChunkTable {
    /// Wrap a backing table with the given cache client.
    ///
    /// `executor` runs the background write-back tasks; it must be distinct
    /// from whatever thread delivers backing-table results, which a Tokio
    /// runtime handle guarantees.
    pub fn new(db: Arc<dyn ChunkTable>, client: Arc<dyn CacheService>, executor: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                client,
                executor,
                stats: StatCounters::default(),
            }),
        }
    }

    /// Fetch the records for `keys`, cache first.
    ///
    /// Under [`Context::FastMissingOk`] the result may be a proper subset
    /// of the request; the backing table is never consulted. Under
    /// [`Context::Authoritative`] keys the cache misses are resolved from
    /// the backing table and scheduled for cache repopulation.
    pub fn get(&self, ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<ChunkRecord>) {
        self.read::<ChunkRead>(ctx, keys, sink);
    }

    /// Fetch fragment metadata for `keys`, cache first. Same contract as
    /// [`CachedChunkTable::get`].
    pub fn get_meta(&self, ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<ChunkMeta>) {
        self.read::<MetaRead>(ctx, keys, sink);
    }

    /// Store a record: write the backing table now, stage the cache side in
    /// `buffer`.
    ///
    /// The backing write happens first so the backing store is never behind
    /// the cache's view; a crash before the buffer flushes costs a future
    /// cache miss, never a false hit.
    pub fn put(&self, record: &ChunkRecord, buffer: &mut CacheBuffer) -> Result<()> {
        self.inner.db.put(record, buffer.db_buffer())?;

        // Only fragmented metadata is cached. This is all readers ask for.
        if let Some(meta) = record.meta() {
            if meta.fragment_count() != 0 {
                buffer.put(Namespace::ChunkMeta.key(record.key()), meta.to_bytes());
            }
        }

        if record.has_data() {
            buffer.put(Namespace::Chunk.key(record.key()), codec::encode(record));
        } else {
            // A record transitioning to "no data" must not leave stale
            // cached bytes behind.
            buffer.remove_after_flush(Namespace::Chunk.key(record.key()));
        }
        Ok(())
    }

    /// Remove a chunk: stage both namespaces' cache removals, then remove
    /// from the backing table through the same buffer.
    ///
    /// Application order across cache and backing store is not guaranteed;
    /// correctness only needs both eventually absent.
    pub fn remove(&self, key: &ChunkKey, buffer: &mut CacheBuffer) -> Result<()> {
        buffer.remove(Namespace::Chunk.key(key));
        buffer.remove(Namespace::ChunkMeta.key(key));
        self.inner.db.remove(key, buffer.db_buffer())
    }

    /// Build a write buffer for this store around the backing table's own
    /// buffer.
    pub fn new_buffer(&self, db: Box<dyn WriteBuffer>) -> CacheBuffer {
        CacheBuffer::new(Arc::clone(&self.inner.client), db)
    }

    /// Snapshot the store's counters.
    pub fn stats(&self) -> StoreStats {
        let hits = self.inner.stats.cache_hits.load(Ordering::Relaxed);
        let misses = self.inner.stats.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        StoreStats {
            cache_hits: hits,
            cache_misses: misses,
            write_backs: self.inner.stats.write_backs.load(Ordering::Relaxed),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    fn read<K: ReadKind>(&self, ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<K::Item>) {
        let to_find = keys.iter().map(|k| K::NS.key(k)).collect();
        let accumulator = Arc::new(FromCache::<K> {
            inner: Arc::clone(&self.inner),
            ctx,
            sink,
            state: Mutex::new(CacheState {
                remaining: keys,
                all: Vec::new(),
                done: false,
            }),
        });
        self.inner.client.get(to_find, accumulator);
    }
}

// =============================================================================
// Cache-phase accumulator
// =============================================================================

struct CacheState<T> {
    remaining: HashSet<ChunkKey>,
    all: Vec<T>,
    done: bool,
}

/// What to do once the cache lookup completes.
enum AfterCache<T> {
    Finish(Vec<T>),
    Fallback(HashSet<ChunkKey>, Vec<T>),
}

/// Per-call accumulator for the cache phase of a read.
struct FromCache<K: ReadKind> {
    inner: Arc<Inner>,
    ctx: Context,
    sink: ReadSink<K::Item>,
    state: Mutex<CacheState<K::Item>>,
}

impl<K: ReadKind> FromCache<K> {
    fn finish_failure(&self, error: Error) {
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.done = true;
        }
        self.sink.fail(error);
    }
}

impl<K: ReadKind> CacheReadSink for FromCache<K> {
    fn on_partial(&self, batch: CacheBatch) {
        for (cache_key, raw) in batch {
            if self.state.lock().done {
                return;
            }
            let key = K::NS.recover(&cache_key);
            let item = match K::decode(key.clone(), raw) {
                Ok(item) => item,
                Err(error) => {
                    // Corruption is fatal, never a miss; masking it would
                    // hide real damage.
                    warn!(chunk = %key, namespace = %K::NS, "undecodable cached record");
                    self.finish_failure(error);
                    return;
                }
            };
            if self.sink.is_streaming() {
                self.sink.forward(vec![item]);
                let mut state = self.state.lock();
                state.remaining.remove(&key);
            } else {
                let mut state = self.state.lock();
                state.all.push(item);
                state.remaining.remove(&key);
            }
            self.inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_success(&self, last: CacheBatch) {
        if !last.is_empty() {
            self.on_partial(last);
        }

        let next = {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.done = true;
            self.inner
                .stats
                .cache_misses
                .fetch_add(state.remaining.len() as u64, Ordering::Relaxed);
            if state.remaining.is_empty() || self.ctx.missing_ok() {
                AfterCache::Finish(mem::take(&mut state.all))
            } else {
                AfterCache::Fallback(mem::take(&mut state.remaining), mem::take(&mut state.all))
            }
        };

        // Lock released; everything below may issue I/O.
        match next {
            AfterCache::Finish(all) => self.sink.succeed(all),
            AfterCache::Fallback(remaining, seed) => {
                debug!(
                    namespace = %K::NS,
                    missing = remaining.len(),
                    "cache missed; consulting backing table"
                );
                let follow_up = Arc::new(FromDatabase::<K> {
                    inner: Arc::clone(&self.inner),
                    sink: self.sink.clone(),
                    state: Mutex::new(DbState {
                        all: seed,
                        done: false,
                    }),
                });
                K::consult(self.inner.db.as_ref(), self.ctx, remaining, ReadSink::streaming(follow_up));
            }
        }
    }

    fn on_failure(&self, error: Error) {
        // A cache failure fails the call; only genuine misses fall through.
        self.finish_failure(error);
    }
}

// =============================================================================
// Backing-table-phase accumulator
// =============================================================================

struct DbState<T> {
    all: Vec<T>,
    done: bool,
}

/// Per-call accumulator for the backing-table phase of a read. Forwards
/// results to the caller and schedules their cache repopulation.
struct FromDatabase<K: ReadKind> {
    inner: Arc<Inner>,
    sink: ReadSink<K::Item>,
    state: Mutex<DbState<K::Item>>,
}

impl<K: ReadKind> FromDatabase<K> {
    /// Re-encoding is expensive; run it on the executor so the delivery
    /// thread is not starved. Best effort: failures only cost hit rate.
    fn schedule_write_back(&self, items: Vec<K::Item>) {
        if items.is_empty() {
            return;
        }
        self.inner
            .stats
            .write_backs
            .fetch_add(items.len() as u64, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        self.inner.executor.spawn(async move {
            let writes = items.into_iter().map(|item| {
                let change = Change::put(K::NS.key(K::chunk_key(&item)), K::cache_bytes(&item));
                let client = Arc::clone(&inner.client);
                async move { client.modify(vec![change]).await }
            });
            for outcome in join_all(writes).await {
                if let Err(error) = outcome {
                    debug!(%error, "cache write-back dropped");
                }
            }
        });
    }
}

impl<K: ReadKind> Completion<K::Item> for FromDatabase<K> {
    fn on_success(&self, rest: Vec<K::Item>) {
        if !rest.is_empty() {
            self.on_partial(rest);
        }
        let all = {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.done = true;
            mem::take(&mut state.all)
        };
        self.sink.succeed(all);
    }

    fn on_failure(&self, error: Error) {
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.done = true;
        }
        self.sink.fail(error);
    }
}

impl<K: ReadKind> StreamingCompletion<K::Item> for FromDatabase<K> {
    fn on_partial(&self, batch: Vec<K::Item>) {
        if self.state.lock().done {
            return;
        }
        let for_cache = batch.clone();
        if self.sink.is_streaming() {
            self.sink.forward(batch);
        } else {
            self.state.lock().all.extend(batch);
        }
        self.schedule_write_back(for_cache);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::buffer::NoopWriteBuffer;
    use crate::store::service::MemCacheService;
    use crate::store::table::MemChunkTable;

    fn key(name: &[u8]) -> ChunkKey {
        ChunkKey::from_bytes(Bytes::copy_from_slice(name))
    }

    fn store(
        db: Arc<MemChunkTable>,
        client: Arc<MemCacheService>,
    ) -> CachedChunkTable {
        CachedChunkTable::new(db, client, Handle::current())
    }

    #[tokio::test]
    async fn test_put_stages_encoded_record() {
        let db = Arc::new(MemChunkTable::new());
        let client = Arc::new(MemCacheService::new());
        let table = store(db.clone(), client.clone());
        let mut buf = table.new_buffer(Box::new(NoopWriteBuffer));

        let record = ChunkRecord::new(key(b"c")).with_data(Bytes::from_static(b"body"));
        table.put(&record, &mut buf).unwrap();

        // Backing write is immediate, cache write only staged.
        assert!(db.contains(&key(b"c")));
        assert!(client.is_empty());
        assert_eq!(buf.pending().len(), 1);
        assert_eq!(buf.pending()[0].key(), &Namespace::Chunk.key(&key(b"c")));
        assert!(buf.deferred_removals().is_empty());
    }

    #[tokio::test]
    async fn test_tombstone_put_stages_removal() {
        let db = Arc::new(MemChunkTable::new());
        let client = Arc::new(MemCacheService::new());
        let table = store(db, client);
        let mut buf = table.new_buffer(Box::new(NoopWriteBuffer));

        let tombstone = ChunkRecord::new(key(b"gone"));
        table.put(&tombstone, &mut buf).unwrap();

        assert!(buf.pending().is_empty());
        assert_eq!(
            buf.deferred_removals(),
            &[Namespace::Chunk.key(&key(b"gone"))]
        );
    }

    #[tokio::test]
    async fn test_unfragmented_meta_not_staged() {
        let db = Arc::new(MemChunkTable::new());
        let client = Arc::new(MemCacheService::new());
        let table = store(db, client);
        let mut buf = table.new_buffer(Box::new(NoopWriteBuffer));

        let record = ChunkRecord::new(key(b"c"))
            .with_data(Bytes::from_static(b"body"))
            .with_meta(ChunkMeta::new(key(b"c")));
        table.put(&record, &mut buf).unwrap();

        // Only the chunk write; a fragment count of zero is not cached.
        assert_eq!(buf.pending().len(), 1);
        assert_eq!(buf.pending()[0].key(), &Namespace::Chunk.key(&key(b"c")));
    }

    #[tokio::test]
    async fn test_fragmented_meta_staged() {
        let db = Arc::new(MemChunkTable::new());
        let client = Arc::new(MemCacheService::new());
        let table = store(db, client);
        let mut buf = table.new_buffer(Box::new(NoopWriteBuffer));

        let record = ChunkRecord::new(key(b"c"))
            .with_data(Bytes::from_static(b"body"))
            .with_meta(ChunkMeta::fragmented(key(b"c"), vec![key(b"f0"), key(b"f1")]));
        table.put(&record, &mut buf).unwrap();

        let staged: Vec<_> = buf.pending().iter().map(Change::key).cloned().collect();
        assert!(staged.contains(&Namespace::ChunkMeta.key(&key(b"c"))));
        assert!(staged.contains(&Namespace::Chunk.key(&key(b"c"))));
    }

    #[tokio::test]
    async fn test_remove_stages_both_namespaces() {
        let db = Arc::new(MemChunkTable::new());
        let client = Arc::new(MemCacheService::new());
        let table = store(db.clone(), client);
        let mut buf = table.new_buffer(Box::new(NoopWriteBuffer));

        db.insert_record(ChunkRecord::new(key(b"c")).with_data(Bytes::from_static(b"x")));
        table.remove(&key(b"c"), &mut buf).unwrap();

        assert!(!db.contains(&key(b"c")));
        let staged: Vec<_> = buf.pending().iter().map(Change::key).cloned().collect();
        assert_eq!(
            staged,
            vec![
                Namespace::Chunk.key(&key(b"c")),
                Namespace::ChunkMeta.key(&key(b"c")),
            ]
        );
    }

    #[tokio::test]
    async fn test_stats_snapshot_serializes() {
        let db = Arc::new(MemChunkTable::new());
        let client = Arc::new(MemCacheService::new());
        let table = store(db, client);

        let stats = table.stats();
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.hit_ratio, 0.0);

        let json = serde_json::to_string(&stats).unwrap();
        let back: StoreStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
