//! Product caching layer.
//!
//! ```text
//! GET  → ProductCache → CacheStore (hit) ─────────────────────────────→ response
//!                     ↘ miss → FetchCoalescer → ProductStorage → CacheStore SET
//! PATCH → ProductCache → validate → ProductStorage → CacheStore SET | DEL
//! ```
//!
//! The cache store is either Redis or a process-local map. When Redis is
//! disabled or unreachable, reads are served from the backing store.

pub mod coalesce;
pub mod memory;
pub mod product;
pub mod redis;
pub mod store;

pub use coalesce::{FetchCoalescer, FetchError, FetchResult, Fetched};
pub use memory::MemoryCacheStore;
pub use product::{
    CACHE_KEY_PREFIX, ProductCache, ReadOutcome, WriteOutcome, WritePolicy, cache_key,
};
pub use self::redis::{RedisCacheStore, create_cache_store};
pub use store::{CacheError, CacheStore, ConnectionState, DynCacheStore};
