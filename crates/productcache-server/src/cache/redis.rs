//! Redis-backed cache store.
//!
//! Operations go through a deadpool-redis pool. A supervisor task probes the
//! connection, publishes [`ConnectionState`] transitions and, after a failure,
//! re-probes with capped exponential backoff until Redis answers again. Probes
//! are bounded by the operation timeout like any other command.
//! Operations that fail while `Connected` wake the supervisor immediately so
//! the orchestrator stops sending traffic to a dead store.

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::memory::MemoryCacheStore;
use super::store::{CacheError, CacheStore, ConnectionState, DynCacheStore, transition};
use crate::config::{CacheConfig, RedisConfig};
use crate::retry::RetryPolicy;

const MODE: &str = "redis";

/// Interval between health probes while connected.
const PROBE_INTERVAL: Duration = Duration::from_secs(5);

pub struct RedisCacheStore {
    pool: Pool,
    op_timeout: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    wake: Arc<Notify>,
    supervisor: JoinHandle<()>,
}

impl RedisCacheStore {
    /// Wraps `pool` and starts the connection supervisor.
    ///
    /// Returns immediately; the store reports `Disconnected` until the first
    /// probe completes.
    pub fn start(pool: Pool, op_timeout: Duration, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let state = Arc::new(state);
        let wake = Arc::new(Notify::new());

        let probe_pool = pool.clone();
        let supervisor = tokio::spawn(supervise(
            move || ping(probe_pool.clone()),
            op_timeout,
            Arc::clone(&state),
            Arc::clone(&wake),
            policy,
        ));

        Self {
            pool,
            op_timeout,
            state,
            wake,
            supervisor,
        }
    }

    /// Waits until the store reports `Connected` or `timeout` elapses.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut events = self.state.subscribe();
        tokio::time::timeout(timeout, events.wait_for(|s| s.is_available()))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    fn report_failure(&self, err: &CacheError) {
        if matches!(err, CacheError::Unavailable(_) | CacheError::Timeout(_))
            && transition(&self.state, ConnectionState::Error, MODE)
        {
            tracing::warn!(error = %err, "Redis operation failed, handing over to reconnect supervisor");
            self.wake.notify_one();
        }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    async fn run<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        let result = match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.op_timeout)),
        };
        if let Err(err) = &result {
            self.report_failure(err);
        }
        result
    }
}

impl Drop for RedisCacheStore {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self
            .run(async {
                let mut conn = self.connection().await?;
                Ok::<_, CacheError>(conn.get::<_, Option<Vec<u8>>>(key).await?)
            })
            .await?;
        tracing::trace!(key = %key, hit = value.is_some(), "Redis GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.run(async {
            let mut conn = self.connection().await?;
            Ok::<_, CacheError>(conn.set::<_, _, ()>(key, value).await?)
        })
        .await?;
        tracing::trace!(key = %key, "Redis SET");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.run(async {
            let mut conn = self.connection().await?;
            Ok::<_, CacheError>(conn.del::<_, ()>(key).await?)
        })
        .await?;
        tracing::trace!(key = %key, "Redis DEL");
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn mode(&self) -> &'static str {
        MODE
    }
}

/// Creates the cache store described by `config`.
///
/// With Redis disabled, or when the pool cannot be built from the configured
/// URL, a process-local store is returned so the service still starts.
pub fn create_cache_store(
    config: &RedisConfig,
    cache: &CacheConfig,
    policy: RetryPolicy,
) -> DynCacheStore {
    if !config.enabled {
        tracing::info!("Redis disabled, using process-local cache store");
        return Arc::new(MemoryCacheStore::new());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let timeout = Duration::from_millis(config.timeout_ms);
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    if let Some(ref mut pool_config) = redis_config.pool {
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
    }

    match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => Arc::new(RedisCacheStore::start(pool, cache.op_timeout(), policy)),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to process-local cache store."
            );
            Arc::new(MemoryCacheStore::new())
        }
    }
}

async fn ping(pool: Pool) -> Result<(), String> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| format!("failed to get Redis connection: {e}"))?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| format!("PING failed: {e}"))?;
    Ok(())
}

/// Connection supervisor loop.
///
/// Attempts `1..=max_retries` follow the policy's backoff and report
/// `Reconnecting`; past the budget the state settles on `Error` and probing
/// continues at the policy's ceiling. A probe that outlives `probe_timeout`
/// counts as failed.
async fn supervise<P, F>(
    probe: P,
    probe_timeout: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    wake: Arc<Notify>,
    policy: RetryPolicy,
) where
    P: Fn() -> F,
    F: Future<Output = Result<(), String>>,
{
    let mut failures: u32 = 0;

    loop {
        let outcome = tokio::time::timeout(probe_timeout, probe())
            .await
            .unwrap_or_else(|_| {
                Err(format!(
                    "probe timed out after {}ms",
                    probe_timeout.as_millis()
                ))
            });
        match outcome {
            Ok(()) => {
                failures = 0;
                transition(&state, ConnectionState::Connected, MODE);
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(PROBE_INTERVAL) => {}
                }
            }
            Err(e) => {
                let delay = if policy.should_retry(failures) {
                    let delay = policy.delay_for(failures);
                    failures += 1;
                    transition(
                        &state,
                        ConnectionState::Reconnecting { attempt: failures },
                        MODE,
                    );
                    delay
                } else {
                    if transition(&state, ConnectionState::Error, MODE) {
                        tracing::error!(
                            error = %e,
                            attempts = failures,
                            retry_every_ms = policy.max_delay().as_millis() as u64,
                            "Redis still unreachable after retry budget, serving from backing store"
                        );
                    }
                    policy.max_delay()
                };
                tracing::debug!(error = %e, delay_ms = delay.as_millis() as u64, "Redis probe failed");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
