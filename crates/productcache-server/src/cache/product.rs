//! Cache-aside orchestrator for products.
//!
//! Reads consult the cache store first and fall back to the coalesced
//! backing-store fetch on a miss, then repopulate the cache. Writes go to the
//! backing store and then update the cache entry according to the configured
//! [`WritePolicy`].
//!
//! The cache is strictly fail-open: a disconnected store is skipped, and any
//! GET failure or unreadable entry is treated as a miss. Cache writes are
//! best effort.
//!
//! When the entry cannot be brought up to date after a successful update, the
//! id is remembered as stale. Reads bypass a stale entry and delete it, and
//! [`ProductCache::spawn_stale_repair`] deletes every stale entry as soon as
//! the store reconnects.
//!
//! Reads and writes for the same id are not serialized. A slow read can land
//! its repopulation after a concurrent update, leaving the pre-update value
//! cached until the next write (last writer to the cache wins).

use axum::http::StatusCode;
use dashmap::DashSet;
use productcache_storage::{DynProductStorage, Product, ProductId, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::coalesce::{FetchCoalescer, FetchError};
use super::store::{CacheError, ConnectionState, DynCacheStore};
use crate::config::CacheConfig;
use crate::validation::validate_patch;

/// Namespace of product cache keys. Shared with existing deployed caches.
pub const CACHE_KEY_PREFIX: &str = "Product:";

/// Cache key for product `id`, e.g. `Product:42`.
pub fn cache_key(id: ProductId) -> String {
    format!("{CACHE_KEY_PREFIX}{id}")
}

/// What a successful update does to the cached entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Replace the entry with the updated product, keeping the cache warm.
    #[default]
    Overwrite,
    /// Delete the entry; the next read pays a backing-store round trip.
    Invalidate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(Product),
    NotFound,
    ServerError,
}

impl ReadOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Found(_) => StatusCode::OK,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_body(self) -> Value {
        match self {
            Self::Found(product) => json!({ "success": true, "product": product }),
            Self::NotFound => json!({ "success": false, "error": "not found" }),
            Self::ServerError => json!({ "success": false, "error": "server error" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Updated(Product),
    InvalidSchema,
    NotFound,
    ServerError,
}

impl WriteOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Updated(_) => StatusCode::OK,
            Self::InvalidSchema => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_body(self) -> Value {
        match self {
            Self::Updated(product) => json!({ "success": true, "updated": product }),
            Self::InvalidSchema => json!({ "success": false, "error": "invalid schema" }),
            Self::NotFound => json!({ "success": false, "error": "not found" }),
            Self::ServerError => json!({ "success": false, "error": "server error" }),
        }
    }
}

pub struct ProductCache {
    store: DynCacheStore,
    storage: DynProductStorage,
    coalescer: FetchCoalescer,
    op_timeout: Duration,
    fetch_timeout: Duration,
    write_policy: WritePolicy,
    /// Ids whose cached entry may predate the last successful update.
    stale: DashSet<ProductId>,
}

impl ProductCache {
    pub fn new(store: DynCacheStore, storage: DynProductStorage, config: &CacheConfig) -> Self {
        Self {
            coalescer: FetchCoalescer::new(storage.clone(), config.fetch_timeout()),
            store,
            storage,
            op_timeout: config.op_timeout(),
            fetch_timeout: config.fetch_timeout(),
            write_policy: config.write_policy,
            stale: DashSet::new(),
        }
    }

    pub fn store(&self) -> &DynCacheStore {
        &self.store
    }

    pub fn storage(&self) -> &DynProductStorage {
        &self.storage
    }

    pub fn coalescer(&self) -> &FetchCoalescer {
        &self.coalescer
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    /// Number of ids whose cached entry is still awaiting repair.
    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    /// Deletes every stale entry. Returns how many were repaired.
    ///
    /// Ids whose DEL fails stay stale and are retried on the next call or
    /// read.
    pub async fn repair_stale(&self) -> usize {
        let ids: Vec<ProductId> = self.stale.iter().map(|id| *id).collect();
        let mut repaired = 0;
        for id in ids {
            if self.repair(id).await {
                repaired += 1;
            }
        }
        if repaired > 0 {
            tracing::info!(repaired, remaining = self.stale.len(), "Repaired stale cache entries");
        }
        repaired
    }

    /// Repairs stale entries on every transition to `Connected`.
    ///
    /// The task exits once the cache or its store is dropped.
    pub fn spawn_stale_repair(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.store.subscribe();
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            while events.changed().await.is_ok() {
                if *events.borrow_and_update() != ConnectionState::Connected {
                    continue;
                }
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.repair_stale().await;
            }
        })
    }

    /// Read-through lookup of product `id`.
    pub async fn get_product(&self, id: ProductId) -> ReadOutcome {
        let key = cache_key(id);

        if let Some(product) = self.read_cached(&key, id).await {
            crate::metrics::record_cache_hit();
            tracing::debug!(key = %key, "Cache hit");
            return ReadOutcome::Found(product);
        }

        let fetched = self.coalescer.fetch_tracked(id).await;
        match fetched.result {
            Ok(Some(product)) => {
                // Joined callers leave the write-back to the caller that started the fetch.
                if !fetched.joined {
                    self.write_back(&key, &product).await;
                }
                ReadOutcome::Found(product)
            }
            Ok(None) => ReadOutcome::NotFound,
            Err(FetchError::Storage(e)) if e.is_not_found() => ReadOutcome::NotFound,
            Err(_) => ReadOutcome::ServerError,
        }
    }

    /// Validates `body`, applies it to product `id` and updates the cache.
    pub async fn update_product(&self, id: ProductId, body: &Value) -> WriteOutcome {
        let patch = match validate_patch(body) {
            Ok(patch) => patch,
            Err(e) => {
                tracing::debug!(product_id = id, error = %e, "Rejected product patch");
                return WriteOutcome::InvalidSchema;
            }
        };

        let updated =
            match tokio::time::timeout(self.fetch_timeout, self.storage.update(id, &patch)).await {
                Ok(Ok(Some(product))) => product,
                Ok(Ok(None)) => return WriteOutcome::NotFound,
                Ok(Err(e)) if e.is_not_found() => return WriteOutcome::NotFound,
                Ok(Err(e)) => {
                    tracing::error!(
                        product_id = id,
                        error = %e,
                        category = %e.category(),
                        "Backing store update failed"
                    );
                    return WriteOutcome::ServerError;
                }
                Err(_) => {
                    let e = StorageError::timeout(self.fetch_timeout);
                    tracing::error!(
                        product_id = id,
                        error = %e,
                        category = %e.category(),
                        "Backing store update failed"
                    );
                    return WriteOutcome::ServerError;
                }
            };

        let key = cache_key(id);
        let result = match self.write_policy {
            WritePolicy::Overwrite => self.try_write_back(&key, &updated).await,
            WritePolicy::Invalidate => self.try_invalidate(&key).await,
        };
        match result {
            Ok(()) => {
                self.stale.remove(&id);
            }
            Err(e) => {
                self.stale.insert(id);
                crate::metrics::record_cache_write_failure();
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Cache update after write failed, entry marked stale"
                );
            }
        }

        WriteOutcome::Updated(updated)
    }

    /// Returns the cached product, or `None` for any kind of miss.
    async fn read_cached(&self, key: &str, id: ProductId) -> Option<Product> {
        let state = self.store.state();
        if !state.is_available() {
            crate::metrics::record_cache_miss("unavailable");
            tracing::debug!(key = %key, state = %state, "Cache store not connected, bypassing");
            return None;
        }

        if self.stale.contains(&id) {
            crate::metrics::record_cache_miss("stale");
            tracing::debug!(key = %key, "Bypassing stale cache entry");
            self.repair(id).await;
            return None;
        }

        let raw = match self.bounded(self.store.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                crate::metrics::record_cache_miss("absent");
                return None;
            }
            Err(e) => {
                crate::metrics::record_cache_miss("error");
                tracing::warn!(key = %key, error = %e, "Cache GET failed, falling back to backing store");
                return None;
            }
        };

        match serde_json::from_slice::<Product>(&raw) {
            Ok(product) if product.id == id => Some(product),
            Ok(product) => {
                crate::metrics::record_cache_miss("malformed");
                tracing::warn!(key = %key, cached_id = product.id, "Cache entry holds a different product");
                None
            }
            Err(e) => {
                crate::metrics::record_cache_miss("malformed");
                tracing::warn!(key = %key, error = %e, "Malformed cache entry");
                None
            }
        }
    }

    async fn write_back(&self, key: &str, product: &Product) {
        if let Err(e) = self.try_write_back(key, product).await {
            crate::metrics::record_cache_write_failure();
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    async fn try_write_back(&self, key: &str, product: &Product) -> Result<(), CacheError> {
        self.ensure_available()?;
        let value = serde_json::to_vec(product)?;
        self.bounded(self.store.set(key, value)).await
    }

    async fn try_invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_available()?;
        self.bounded(self.store.delete(key)).await
    }

    /// Deletes the entry for stale `id`, clearing the mark on success.
    async fn repair(&self, id: ProductId) -> bool {
        let key = cache_key(id);
        match self.try_invalidate(&key).await {
            Ok(()) => {
                self.stale.remove(&id);
                tracing::debug!(key = %key, "Stale cache entry deleted");
                true
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Stale cache entry still pending repair");
                false
            }
        }
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        let state = self.store.state();
        if state.is_available() {
            Ok(())
        } else {
            Err(CacheError::Unavailable(state.to_string()))
        }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.op_timeout, op)
            .await
            .unwrap_or(Err(CacheError::Timeout(self.op_timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key(42), "Product:42");
        assert_eq!(cache_key(-1), "Product:-1");
    }

    #[test]
    fn test_write_policy_serde() {
        let policy: WritePolicy = serde_json::from_str("\"invalidate\"").unwrap();
        assert_eq!(policy, WritePolicy::Invalidate);
        assert_eq!(WritePolicy::default(), WritePolicy::Overwrite);
        assert_eq!(
            serde_json::to_string(&WritePolicy::Overwrite).unwrap(),
            "\"overwrite\""
        );
    }

    #[test]
    fn test_read_outcome_bodies() {
        let product = Product::new(42, "Widget", "d", "9.99");
        let found = ReadOutcome::Found(product);
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(
            found.into_body(),
            json!({
                "success": true,
                "product": {"id": 42, "name": "Widget", "description": "d", "price": "9.99"}
            })
        );

        assert_eq!(ReadOutcome::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ReadOutcome::ServerError.into_body(),
            json!({"success": false, "error": "server error"})
        );
    }

    #[test]
    fn test_write_outcome_bodies() {
        assert_eq!(WriteOutcome::InvalidSchema.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            WriteOutcome::InvalidSchema.into_body(),
            json!({"success": false, "error": "invalid schema"})
        );
        assert_eq!(
            WriteOutcome::NotFound.into_body(),
            json!({"success": false, "error": "not found"})
        );

        let updated = WriteOutcome::Updated(Product::new(7, "X", "d", "1.00"));
        assert_eq!(updated.status(), StatusCode::OK);
        assert_eq!(updated.into_body()["updated"]["name"], "X");
    }
}
