//! Backing Table Contract
//!
//! The authoritative, durable chunk store behind the cache tier. It is
//! reachable only through a distributed key-value client and may block
//! internally; reads complete through the same sink contract the cache
//! tier exposes to its own callers, writes stage through the table's
//! [`WriteBuffer`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::buffer::WriteBuffer;
use super::sink::ReadSink;
use crate::chunk::{ChunkKey, ChunkRecord};
use crate::error::{Error, Result};
use crate::meta::ChunkMeta;

/// Consistency mode of a read, chosen per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Fast, cache-only lookup; missing keys are acceptable and the result
    /// may be a proper subset of the request.
    FastMissingOk,
    /// The result must be authoritative; missing keys justify consulting
    /// the backing table.
    Authoritative,
}

impl Context {
    /// Whether a partial result may be returned without consulting the
    /// backing table.
    #[inline]
    pub fn missing_ok(self) -> bool {
        matches!(self, Context::FastMissingOk)
    }
}

/// Authoritative chunk storage contract.
///
/// Calls return immediately; reads eventually invoke the sink exactly as
/// documented on [`ReadSink`], writes must complete (or fail) before
/// returning.
pub trait ChunkTable: Send + Sync {
    /// Fetch the records for `keys`. Keys not present are simply not
    /// delivered.
    fn get(&self, ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<ChunkRecord>);

    /// Fetch fragment metadata for `keys`.
    fn get_meta(&self, ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<ChunkMeta>);

    /// Store a record, staging through `buffer`.
    fn put(&self, record: &ChunkRecord, buffer: &mut dyn WriteBuffer) -> Result<()>;

    /// Remove a record and its metadata, staging through `buffer`.
    fn remove(&self, key: &ChunkKey, buffer: &mut dyn WriteBuffer) -> Result<()>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory backing table for testing.
///
/// Mutations apply immediately (the write buffer is accepted but unused),
/// reads deliver inline. Every queried key set is recorded so tests can
/// assert the table was consulted for exactly the expected keys.
#[derive(Default)]
pub struct MemChunkTable {
    records: DashMap<ChunkKey, ChunkRecord>,
    metas: DashMap<ChunkKey, ChunkMeta>,
    fail_reads: AtomicBool,
    chunk_queries: Mutex<Vec<HashSet<ChunkKey>>>,
    meta_queries: Mutex<Vec<HashSet<ChunkKey>>>,
}

impl MemChunkTable {
    /// Create a new in-memory table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly.
    pub fn insert_record(&self, record: ChunkRecord) {
        if let Some(meta) = record.meta() {
            self.metas.insert(record.key().clone(), meta.clone());
        }
        self.records.insert(record.key().clone(), record);
    }

    /// Seed fragment metadata directly.
    pub fn insert_meta(&self, meta: ChunkMeta) {
        self.metas.insert(meta.key().clone(), meta);
    }

    /// Whether the table holds a record for `key`.
    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.records.contains_key(key)
    }

    /// Make every subsequent read fail.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::Relaxed);
    }

    /// Key sets of every `get` call so far, in call order.
    pub fn chunk_queries(&self) -> Vec<HashSet<ChunkKey>> {
        self.chunk_queries.lock().clone()
    }

    /// Key sets of every `get_meta` call so far, in call order.
    pub fn meta_queries(&self) -> Vec<HashSet<ChunkKey>> {
        self.meta_queries.lock().clone()
    }

    fn deliver<T>(&self, found: Vec<T>, sink: ReadSink<T>) {
        if self.fail_reads.load(Ordering::Relaxed) {
            sink.fail(Error::storage("backing table unavailable"));
            return;
        }
        if sink.is_streaming() {
            if !found.is_empty() {
                sink.forward(found);
            }
            sink.succeed(Vec::new());
        } else {
            sink.succeed(found);
        }
    }
}

impl ChunkTable for MemChunkTable {
    fn get(&self, _ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<ChunkRecord>) {
        self.chunk_queries.lock().push(keys.clone());
        let found = keys
            .iter()
            .filter_map(|k| self.records.get(k).map(|r| r.clone()))
            .collect();
        self.deliver(found, sink);
    }

    fn get_meta(&self, _ctx: Context, keys: HashSet<ChunkKey>, sink: ReadSink<ChunkMeta>) {
        self.meta_queries.lock().push(keys.clone());
        let found = keys
            .iter()
            .filter_map(|k| self.metas.get(k).map(|m| m.clone()))
            .collect();
        self.deliver(found, sink);
    }

    fn put(&self, record: &ChunkRecord, _buffer: &mut dyn WriteBuffer) -> Result<()> {
        self.insert_record(record.clone());
        Ok(())
    }

    fn remove(&self, key: &ChunkKey, _buffer: &mut dyn WriteBuffer) -> Result<()> {
        self.records.remove(key);
        self.metas.remove(key);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
