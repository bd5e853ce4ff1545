//! In-memory backing store for the product cache service.
//!
//! This crate provides an in-memory implementation of the `ProductStorage`
//! trait from `productcache-storage`, backed by a `DashMap`.
//!
//! Besides local runs without PostgreSQL, it is the backing store used by the
//! cache layer's tests: it can add artificial latency, simulate an outage and
//! counts every call it receives.
//!
//! # Example
//!
//! ```ignore
//! use productcache_db_memory::InMemoryProductStorage;
//! use productcache_storage::{Product, ProductStorage};
//!
//! let storage = InMemoryProductStorage::with_products([Product::new(1, "Widget", "d", "9.99")]);
//! let found = storage.find_by_id(1).await?;
//! ```

pub mod storage;

pub use productcache_storage::{Product, ProductPatch, ProductStorage, StorageError};
pub use storage::{CallCounts, InMemoryProductStorage};

/// Type alias for a shareable in-memory storage instance.
pub type DynInMemoryStorage = std::sync::Arc<InMemoryProductStorage>;

/// Creates a new, empty in-memory backing store.
pub fn create_product_storage() -> DynInMemoryStorage {
    std::sync::Arc::new(InMemoryProductStorage::new())
}
