//! Product cache service.
//!
//! A read-through cache with request coalescing in front of a product
//! store, served over HTTP.

pub mod cache;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod retry;
pub mod server;
pub mod validation;

pub use cache::{
    CacheStore, ConnectionState, DynCacheStore, FetchCoalescer, MemoryCacheStore, ProductCache,
    ReadOutcome, RedisCacheStore, WriteOutcome, WritePolicy, cache_key, create_cache_store,
};
pub use config::{AppConfig, CacheConfig, PostgresStorageConfig, RedisConfig, ServerConfig};
pub use observability::{init_tracing, shutdown_tracing};
pub use retry::RetryPolicy;
pub use server::{AppState, ProductCacheServer, ServerBuilder, build_app};
pub use validation::{ValidationError, validate_patch};
