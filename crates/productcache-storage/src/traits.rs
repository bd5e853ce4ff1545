//! Storage traits for the backing store abstraction.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{Product, ProductId, ProductPatch};

/// The contract every backing store must implement.
///
/// The backing store is the single source of truth for products; the cache
/// layer only mirrors what it returns. Implementations must be thread-safe
/// (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use productcache_storage::{Product, ProductStorage, StorageError};
///
/// async fn load(storage: &dyn ProductStorage, id: i64) -> Result<Product, StorageError> {
///     storage
///         .find_by_id(id)
///         .await?
///         .ok_or_else(|| StorageError::not_found(id))
/// }
/// ```
#[async_trait]
pub trait ProductStorage: Send + Sync {
    /// Reads a product by ID.
    ///
    /// Returns `None` if the product does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing products.
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, StorageError>;

    /// Applies a partial update to an existing product and returns the result.
    ///
    /// Fields left as `None` in the patch keep their stored value.
    /// Returns `None` if the product does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing products.
    async fn update(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, StorageError>;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}
