//! Cache-Aside Store Tier
//!
//! Composes an asynchronous distributed cache with the authoritative
//! backing table behind one read/write surface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       CachedChunkTable                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  CacheService (async)          │  ChunkTable (authoritative)     │
//! │  ┌──────────────────────────┐  │  ┌──────────────────────────┐   │
//! │  │ batched get, streaming   │  │  │ get / get_meta / put /   │   │
//! │  │ delivery; fire-and-forget│  │  │ remove; may block        │   │
//! │  │ modify                   │  │  │ internally               │   │
//! │  └──────────────────────────┘  │  └──────────────────────────┘   │
//! │               │                │              │                  │
//! │               └── consult first┴─ fall through on miss ──┐       │
//! │                                                          ▼       │
//! │                          background write-back (Tokio executor)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads consult the cache first and fall through to the backing table
//! only for keys the cache misses, when the caller asked for authoritative
//! results. Writes settle the backing table first and stage the cache side
//! in the caller's write buffer.

mod buffer;
mod cached;
mod namespace;
mod service;
mod sink;
mod table;

pub use buffer::{CacheBuffer, NoopWriteBuffer, WriteBuffer};
pub use cached::{CachedChunkTable, StoreStats};
pub use namespace::{CacheKey, Namespace};
pub use service::{CacheBatch, CacheReadSink, CacheService, Change, MemCacheService};
pub use sink::{Completion, ReadSink, StreamingCompletion};
pub use table::{ChunkTable, Context, MemChunkTable};
