use std::sync::Arc;

use productcache_db_memory::InMemoryProductStorage;
use productcache_server::cache::{MemoryCacheStore, ProductCache, cache_key};
use productcache_server::{AppConfig, AppState, build_app};
use productcache_storage::Product;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    store: Arc<MemoryCacheStore>,
    storage: Arc<InMemoryProductStorage>,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

async fn start_server() -> TestServer {
    let cfg = AppConfig::default();
    let store = Arc::new(MemoryCacheStore::new());
    let storage = Arc::new(InMemoryProductStorage::with_products([
        Product::new(1, "Lamp", "Desk lamp", "19.99"),
        Product::new(7, "Old", "d", "1.00"),
    ]));
    let cache = ProductCache::new(store.clone(), storage.clone(), &cfg.cache);
    let app = build_app(&cfg, AppState::new(cache));

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        store,
        storage,
        shutdown: tx,
        handle,
    }
}

#[tokio::test]
async fn get_product_round_trip() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/products/1", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "success": true,
            "product": {"id": 1, "name": "Lamp", "description": "Desk lamp", "price": "19.99"}
        })
    );
    assert!(server.store.contains_key(&cache_key(1)));

    // Second read is served from the cache
    let resp = client
        .get(format!("{}/api/products/1", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(server.storage.call_counts().find_by_id, 1);

    server.stop().await;
}

#[tokio::test]
async fn get_missing_or_bad_id_is_not_found() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    for id in ["999", "abc"] {
        let resp = client
            .get(format!("{}/api/products/{id}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"success": false, "error": "not found"}));
    }

    server.stop().await;
}

#[tokio::test]
async fn get_reports_server_error_when_backing_store_fails() {
    let server = start_server().await;
    server.storage.set_unavailable(true);

    let resp = reqwest::get(format!("{}/api/products/1", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"success": false, "error": "server error"}));

    server.stop().await;
}

#[tokio::test]
async fn patch_product_updates_and_warms_cache() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .patch(format!("{}/api/products/7", server.base))
        .json(&json!({"name": "X"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "success": true,
            "updated": {"id": 7, "name": "X", "description": "d", "price": "1.00"}
        })
    );

    let resp = client
        .get(format!("{}/api/products/7", server.base))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["product"]["name"], "X");
    assert_eq!(server.storage.call_counts().find_by_id, 0);

    server.stop().await;
}

#[tokio::test]
async fn patch_rejects_invalid_bodies() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .patch(format!("{}/api/products/7", server.base))
        .json(&json!({"price": 123}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"success": false, "error": "invalid schema"}));

    let resp = client
        .patch(format!("{}/api/products/7", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert_eq!(server.storage.call_counts().update, 0);

    server.stop().await;
}

#[tokio::test]
async fn patch_missing_product_is_not_found() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .patch(format!("{}/api/products/999", server.base))
        .json(&json!({"name": "X"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"success": false, "error": "not found"}));
    assert!(!server.store.contains_key(&cache_key(999)));

    server.stop().await;
}

#[tokio::test]
async fn health_endpoints_report_cache_state() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/healthz", server.base))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let resp = client
        .get(format!("{}/readyz", server.base))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["cache_mode"], "local");
    assert_eq!(body["cache_state"], "connected");
    assert_eq!(body["storage_backend"], "memory");
    assert_eq!(body["in_flight_fetches"], 0);

    server.stop().await;
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    productcache_server::metrics::init_metrics();
    let server = start_server().await;
    let client = reqwest::Client::new();

    client
        .get(format!("{}/api/products/1", server.base))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!("{}/metrics", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("backing_store_fetches_total"));

    server.stop().await;
}
