//! # productcache-storage
//!
//! Backing store abstraction for the product cache service.
//!
//! This crate defines the contract the caching layer consumes from the single
//! source of truth. It does not contain any implementations - those are
//! provided by `productcache-db-memory` and `productcache-db-postgres`.
//!
//! ## Overview
//!
//! The main trait is [`ProductStorage`], which defines:
//! - `find_by_id`: look up a product, `None` when absent
//! - `update`: apply a partial update, `None` when absent
//!
//! ## Example
//!
//! ```ignore
//! use productcache_storage::{ProductPatch, ProductStorage, StorageError};
//!
//! async fn rename(storage: &dyn ProductStorage, id: i64) -> Result<(), StorageError> {
//!     let patch = ProductPatch::new().with_name("Widget");
//!     storage
//!         .update(id, &patch)
//!         .await?
//!         .ok_or_else(|| StorageError::not_found(id))?;
//!     Ok(())
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::ProductStorage;
pub use types::{Product, ProductId, ProductPatch};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shareable storage trait object.
pub type DynProductStorage = std::sync::Arc<dyn ProductStorage>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::ProductStorage;
    pub use crate::types::{Product, ProductId, ProductPatch};
    pub use crate::{DynProductStorage, StorageResult};
}
