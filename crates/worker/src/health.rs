//! Health, readiness and stats endpoints.
//!
//! - `GET /healthz`: process is up (always 200)
//! - `GET /readyz`: 200 while the pool accepts work, 503 once draining starts
//! - `GET /stats`: pool counters and queue depth

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, routing::get, Json, Router};

use assetflow_infra::queue::JobQueue;
use assetflow_infra::workers::WorkerPool;

#[derive(Clone)]
pub struct HealthState {
    pub pool: Arc<WorkerPool>,
    pub queue: Arc<dyn JobQueue>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats))
        .layer(Extension(state))
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz(Extension(state): Extension<HealthState>) -> impl IntoResponse {
    let accepting = state.pool.is_accepting();
    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "accepting": accepting })))
}

pub async fn stats(Extension(state): Extension<HealthState>) -> impl IntoResponse {
    match state.queue.stats().await {
        Ok(queue) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "pool": state.pool.stats(),
                "queue": queue,
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "queue stats unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}
