use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use productcache_storage::{Product, ProductId, ProductPatch, ProductStorage, StorageError};

/// Snapshot of how often each backing store operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub find_by_id: usize,
    pub update: usize,
}

/// In-memory product store.
///
/// - Per-key locking via `DashMap`, so an update is atomic for its product
/// - Optional artificial latency applied to every call
/// - Outage simulation: while unavailable, every call fails with a
///   connection error
#[derive(Debug, Default)]
pub struct InMemoryProductStorage {
    data: DashMap<ProductId, Product>,
    latency_ms: AtomicU64,
    unavailable: AtomicBool,
    find_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl InMemoryProductStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `products`.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let storage = Self::new();
        for product in products {
            storage.insert(product);
        }
        storage
    }

    /// Adds a fixed delay to every subsequent call.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Changes the artificial latency.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Toggles the simulated outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Inserts or replaces a product, bypassing the call counters.
    pub fn insert(&self, product: Product) {
        self.data.insert(product.id, product);
    }

    /// Reads a product without latency or counting.
    pub fn peek(&self, id: ProductId) -> Option<Product> {
        self.data.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns how many times each operation has been called so far.
    pub fn call_counts(&self) -> CallCounts {
        CallCounts {
            find_by_id: self.find_calls.load(Ordering::SeqCst),
            update: self.update_calls.load(Ordering::SeqCst),
        }
    }

    async fn simulate_io(&self) -> Result<(), StorageError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::connection_error(
                "in-memory store marked unavailable",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStorage for InMemoryProductStorage {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, StorageError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;
        let found = self.peek(id);
        tracing::trace!(id, found = found.is_some(), "in-memory find_by_id");
        Ok(found)
    }

    async fn update(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, StorageError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;
        let updated = self.data.get_mut(&id).map(|mut entry| {
            patch.apply(entry.value_mut());
            entry.value().clone()
        });
        tracing::trace!(id, found = updated.is_some(), "in-memory update");
        Ok(updated)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> Product {
        Product::new(42, "Widget", "d", "9.99")
    }

    #[tokio::test]
    async fn test_find_existing_and_missing() {
        let storage = InMemoryProductStorage::with_products([widget()]);

        assert_eq!(storage.find_by_id(42).await.unwrap(), Some(widget()));
        assert_eq!(storage.find_by_id(7).await.unwrap(), None);
        assert_eq!(storage.call_counts().find_by_id, 2);
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let storage = InMemoryProductStorage::with_products([Product::new(7, "Old", "d", "1.00")]);

        let updated = storage
            .update(7, &ProductPatch::new().with_name("X"))
            .await
            .unwrap();

        assert_eq!(updated, Some(Product::new(7, "X", "d", "1.00")));
        assert_eq!(storage.peek(7), updated);
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let storage = InMemoryProductStorage::new();

        let updated = storage
            .update(999, &ProductPatch::new().with_name("X"))
            .await
            .unwrap();

        assert!(updated.is_none());
        assert!(storage.is_empty());
        assert_eq!(storage.call_counts().update, 1);
    }

    #[tokio::test]
    async fn test_unavailable_fails_calls() {
        let storage = InMemoryProductStorage::with_products([widget()]);
        storage.set_unavailable(true);

        let err = storage.find_by_id(42).await.unwrap_err();
        assert!(matches!(err, StorageError::ConnectionError { .. }));

        storage.set_unavailable(false);
        assert!(storage.find_by_id(42).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let storage =
            InMemoryProductStorage::with_products([widget()]).with_latency(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        storage.find_by_id(42).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
