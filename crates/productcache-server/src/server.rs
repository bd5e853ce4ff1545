use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use productcache_storage::DynProductStorage;
use tower_http::trace::TraceLayer;

use crate::cache::{DynCacheStore, ProductCache, create_cache_store};
use crate::config::{AppConfig, StorageBackendKind};
use crate::retry::RetryPolicy;
use crate::{handlers, middleware as app_middleware};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ProductCache>,
}

impl AppState {
    pub fn new(cache: ProductCache) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }
}

pub struct ProductCacheServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        .route(
            "/api/products/{id}",
            get(handlers::get_product).patch(handlers::update_product),
        )
        // Health and metrics endpoints
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        // Middleware stack (order: request id -> metrics -> trace -> body limit)
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(middleware::from_fn(app_middleware::http_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// Creates the configured backing store.
///
/// PostgreSQL is retried with `policy` so the service can start before its
/// database is up.
pub async fn build_storage(
    cfg: &AppConfig,
    policy: &RetryPolicy,
) -> anyhow::Result<DynProductStorage> {
    match cfg.storage.backend {
        StorageBackendKind::Memory => {
            tracing::info!("Using in-memory backing store");
            let storage: DynProductStorage = productcache_db_memory::create_product_storage();
            Ok(storage)
        }
        StorageBackendKind::Postgres => {
            let pg = cfg.storage.postgres.to_backend_config();
            let storage: DynProductStorage = policy
                .retry("postgres", || productcache_db_postgres::create_storage(pg.clone()))
                .await?;
            tracing::info!("Using PostgreSQL backing store");
            Ok(storage)
        }
    }
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    storage: Option<DynProductStorage>,
    cache_store: Option<DynCacheStore>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            storage: None,
            cache_store: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Uses `storage` instead of the configured backing store.
    pub fn with_storage(mut self, storage: DynProductStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Uses `store` instead of the configured cache store.
    pub fn with_cache_store(mut self, store: DynCacheStore) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub async fn build(self) -> anyhow::Result<ProductCacheServer> {
        crate::metrics::init_metrics();

        let policy = self.config.retry.policy();
        let storage = match self.storage {
            Some(storage) => storage,
            None => build_storage(&self.config, &policy).await?,
        };
        let store = match self.cache_store {
            Some(store) => store,
            None => create_cache_store(&self.config.redis, &self.config.cache, policy),
        };
        crate::metrics::set_cache_connection_state(store.mode(), store.state());

        tracing::info!(
            storage = storage.backend_name(),
            cache = store.mode(),
            write_policy = ?self.config.cache.write_policy,
            "Product cache ready"
        );

        let state = AppState::new(ProductCache::new(store, storage, &self.config.cache));
        state.cache.spawn_stale_repair();
        let app = build_app(&self.config, state);

        Ok(ProductCacheServer {
            addr: self.addr,
            app,
        })
    }
}

impl ProductCacheServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
