use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use productcache_storage::ProductId;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{ReadOutcome, WriteOutcome};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    cache_mode: &'static str,
    cache_state: String,
    storage_backend: &'static str,
    in_flight_fetches: usize,
}

impl IntoResponse for ReadOutcome {
    fn into_response(self) -> Response {
        (self.status(), Json(self.into_body())).into_response()
    }
}

impl IntoResponse for WriteOutcome {
    fn into_response(self) -> Response {
        (self.status(), Json(self.into_body())).into_response()
    }
}

/// Route ids arrive as text; anything that is not an integer cannot name a product.
fn parse_id(raw: &str) -> Option<ProductId> {
    raw.trim().parse().ok()
}

pub async fn get_product(State(state): State<AppState>, Path(id): Path<String>) -> ReadOutcome {
    match parse_id(&id) {
        Some(id) => state.cache.get_product(id).await,
        None => ReadOutcome::NotFound,
    }
}

/// Body is read raw so that unparsable JSON gets the same answer as a
/// well-formed body with the wrong shape.
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> WriteOutcome {
    let Some(id) = parse_id(&id) else {
        return WriteOutcome::NotFound;
    };
    match serde_json::from_slice::<Value>(&body) {
        Ok(body) => state.cache.update_product(id, &body).await,
        Err(e) => {
            tracing::debug!(product_id = id, error = %e, "Unparsable product patch body");
            WriteOutcome::InvalidSchema
        }
    }
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready as long as the process can serve reads; a degraded cache only adds latency.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.cache.store();
    let body = ReadyResponse {
        status: "ready",
        cache_mode: store.mode(),
        cache_state: store.state().to_string(),
        storage_backend: state.cache.storage().backend_name(),
        in_flight_fetches: state.cache.coalescer().in_flight(),
    };
    (StatusCode::OK, Json(body))
}

pub async fn metrics() -> impl IntoResponse {
    match crate::metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}
