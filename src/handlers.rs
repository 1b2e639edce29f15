use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;

/// Application state for the service's own endpoints
#[derive(Clone)]
pub struct AppState {
    pub health: HealthChecker,
    pub metrics: MetricsCollector,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let store = status.dependencies.counter_store;

    if store.status == "healthy" {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "counter_store": store.backend,
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "counter_store": store.backend,
                "error": store.error,
            })),
        )
    }
}

/// Throttling counters per policy
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.report().await)
}
