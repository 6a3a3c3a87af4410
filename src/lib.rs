//! CacheStor - Cache-Aside Tier for a Content-Addressable Chunk Store
//!
//! The caching tier of a distributed, content-addressable object store.
//! Callers need immutable, chunk-granular binary blobs and their
//! side-channel metadata; the authoritative store is durable but slow.
//! This crate sits between the two: it namespaces chunk keys into a flat
//! cache key space, encodes chunk records compactly for cache residency,
//! and orchestrates cache-aside reads that stream partial results while
//! repopulating the cache in the background.
//!
//! # Architecture
//!
//! ```text
//! caller ──► CachedChunkTable ──► CacheService (fast, partial, sharded)
//!                   │                        │ miss
//!                   │                        ▼
//!                   │              ChunkTable (authoritative)
//!                   │                        │
//!                   └── results ◄────────────┴──► background write-back
//! ```
//!
//! # Modules
//!
//! - [`chunk`] - Chunk identity and record types
//! - [`codec`] - Compact binary encoding of chunk records
//! - [`error`] - Error types
//! - [`meta`] - Fragment metadata
//! - [`store`] - The cache-aside store, its contracts, and write buffering

pub mod chunk;
pub mod codec;
pub mod error;
pub mod meta;
pub mod store;

// Re-export commonly used types
pub use chunk::{ChunkKey, ChunkRecord};
pub use error::{Error, Result};
pub use meta::ChunkMeta;
pub use store::{
    CacheBuffer, CacheKey, CacheService, CachedChunkTable, ChunkTable, Completion, Context,
    Namespace, ReadSink, StreamingCompletion, WriteBuffer,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
