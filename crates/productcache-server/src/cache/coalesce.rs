//! Request coalescing for backing-store reads.
//!
//! At most one backing-store fetch is in flight per product id. Concurrent
//! readers of the same id join the running fetch and observe the same result.
//! The registry entry is removed as soon as the fetch settles, so the next
//! request after that starts a fresh fetch.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use productcache_storage::{DynProductStorage, Product, ProductId, StorageError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Failure shared by every waiter of a coalesced fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Storage(Arc<StorageError>),

    #[error("backing store fetch timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The fetch task ended without producing a result.
    #[error("backing store fetch was aborted")]
    Aborted,
}

pub type FetchResult = Result<Option<Product>, FetchError>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Result of a fetch plus whether this caller started it.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub result: FetchResult,
    /// `true` when the caller joined a fetch started by someone else.
    pub joined: bool,
}

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

type Registry = DashMap<ProductId, InFlight>;

/// Per-id single-flight wrapper around [`ProductStorage::find_by_id`].
///
/// [`ProductStorage::find_by_id`]: productcache_storage::ProductStorage::find_by_id
pub struct FetchCoalescer {
    storage: DynProductStorage,
    registry: Arc<Registry>,
    generations: AtomicU64,
    timeout: Duration,
}

impl FetchCoalescer {
    pub fn new(storage: DynProductStorage, timeout: Duration) -> Self {
        Self {
            storage,
            registry: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
            timeout,
        }
    }

    /// Fetches product `id`, joining a fetch already in flight for it.
    ///
    /// The fetch runs on its own task: dropping every caller does not cancel
    /// it, and the registry entry is still released when it settles.
    pub async fn fetch(&self, id: ProductId) -> FetchResult {
        self.fetch_tracked(id).await.result
    }

    /// Like [`fetch`](Self::fetch), also reporting whether the caller joined
    /// an existing fetch. Lets exactly one caller act on the result.
    pub async fn fetch_tracked(&self, id: ProductId) -> Fetched {
        let (fetch, joined) = self.join_or_start(id);
        Fetched {
            result: fetch.await,
            joined,
        }
    }

    /// Number of ids with a fetch currently in flight.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    pub fn is_in_flight(&self, id: ProductId) -> bool {
        self.registry.contains_key(&id)
    }

    fn join_or_start(&self, id: ProductId) -> (SharedFetch, bool) {
        match self.registry.entry(id) {
            Entry::Occupied(entry) => {
                tracing::debug!(product_id = id, "Joining in-flight fetch");
                crate::metrics::record_coalesced_waiter();
                (entry.get().fetch.clone(), true)
            }
            Entry::Vacant(entry) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let task = tokio::spawn(run_fetch(
                    Arc::clone(&self.storage),
                    Arc::clone(&self.registry),
                    id,
                    generation,
                    self.timeout,
                ));
                let fetch = async move { task.await.unwrap_or(Err(FetchError::Aborted)) }
                    .boxed()
                    .shared();
                entry.insert(InFlight {
                    generation,
                    fetch: fetch.clone(),
                });
                (fetch, false)
            }
        }
    }
}

/// Removes the registry entry for one fetch generation when dropped.
///
/// Runs on success, failure and task abort alike, and never removes a newer
/// fetch that reused the id.
struct Deregister {
    registry: Arc<Registry>,
    id: ProductId,
    generation: u64,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry
            .remove_if(&self.id, |_, in_flight| in_flight.generation == self.generation);
    }
}

async fn run_fetch(
    storage: DynProductStorage,
    registry: Arc<Registry>,
    id: ProductId,
    generation: u64,
    timeout: Duration,
) -> FetchResult {
    let _deregister = Deregister {
        registry,
        id,
        generation,
    };

    crate::metrics::record_backing_fetch();
    let result = match tokio::time::timeout(timeout, storage.find_by_id(id)).await {
        Ok(Ok(product)) => Ok(product),
        Ok(Err(e)) => Err(FetchError::Storage(Arc::new(e))),
        Err(_) => Err(FetchError::Timeout(timeout)),
    };

    if let Err(e) = &result {
        tracing::error!(product_id = id, error = %e, "Backing store fetch failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use productcache_db_memory::InMemoryProductStorage;

    fn product(id: ProductId) -> Product {
        Product::new(id, "Lamp", "Desk lamp", "19.99")
    }

    fn setup(latency_ms: u64) -> (Arc<InMemoryProductStorage>, FetchCoalescer) {
        let storage = Arc::new(
            InMemoryProductStorage::with_products([product(1)])
                .with_latency(Duration::from_millis(latency_ms)),
        );
        let coalescer = FetchCoalescer::new(storage.clone(), Duration::from_secs(5));
        (storage, coalescer)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_share_one_backing_call() {
        let (storage, coalescer) = setup(100);

        let results =
            futures_util::future::join_all((0..20).map(|_| coalescer.fetch(1))).await;

        assert_eq!(storage.call_counts().find_by_id, 1);
        for result in results {
            assert_eq!(result.unwrap(), Some(product(1)));
        }
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_first_caller_leads() {
        let (_storage, coalescer) = setup(50);

        let (first, second, third) = tokio::join!(
            coalescer.fetch_tracked(1),
            coalescer.fetch_tracked(1),
            coalescer.fetch_tracked(1)
        );

        assert!(!first.joined);
        assert!(second.joined);
        assert!(third.joined);
        assert_eq!(first.result.unwrap(), second.result.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn settled_fetch_is_not_reused() {
        let (storage, coalescer) = setup(10);

        coalescer.fetch(1).await.unwrap();
        assert!(!coalescer.is_in_flight(1));
        coalescer.fetch(1).await.unwrap();

        assert_eq!(storage.call_counts().find_by_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_ids_fetch_independently() {
        let (storage, coalescer) = setup(50);
        storage.insert(product(2));

        let (a, b) = tokio::join!(coalescer.fetch(1), coalescer.fetch(2));

        assert_eq!(a.unwrap().map(|p| p.id), Some(1));
        assert_eq!(b.unwrap().map(|p| p.id), Some(2));
        assert_eq!(storage.call_counts().find_by_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_then_clears() {
        let (storage, coalescer) = setup(50);
        storage.set_unavailable(true);

        let (a, b, c) = tokio::join!(coalescer.fetch(1), coalescer.fetch(1), coalescer.fetch(1));
        for result in [a, b, c] {
            assert!(matches!(result, Err(FetchError::Storage(_))));
        }
        assert_eq!(storage.call_counts().find_by_id, 1);
        assert_eq!(coalescer.in_flight(), 0);

        storage.set_unavailable(false);
        assert_eq!(coalescer.fetch(1).await.unwrap(), Some(product(1)));
        assert_eq!(storage.call_counts().find_by_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_product_is_shared_as_none() {
        let (storage, coalescer) = setup(20);

        let (a, b) = tokio::join!(coalescer.fetch(42), coalescer.fetch(42));

        assert_eq!(a.unwrap(), None);
        assert_eq!(b.unwrap(), None);
        assert_eq!(storage.call_counts().find_by_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_all_waiters() {
        let storage = Arc::new(
            InMemoryProductStorage::with_products([product(1)])
                .with_latency(Duration::from_secs(10)),
        );
        let coalescer = FetchCoalescer::new(storage.clone(), Duration::from_millis(200));

        let (a, b) = tokio::join!(coalescer.fetch(1), coalescer.fetch(1));

        assert!(matches!(a, Err(FetchError::Timeout(_))));
        assert!(matches!(b, Err(FetchError::Timeout(_))));
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetch_still_completes_and_deregisters() {
        let (storage, coalescer) = setup(100);

        let caller = coalescer.fetch(1);
        let _ = tokio::time::timeout(Duration::from_millis(10), caller).await;
        assert!(coalescer.is_in_flight(1));

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(storage.call_counts().find_by_id, 1);
        assert!(!coalescer.is_in_flight(1));
    }
}
