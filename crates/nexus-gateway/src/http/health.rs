use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health/live — liveness probe; returns 200 unconditionally (§6.1).
pub async fn live_handler() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready — readiness probe; verifies DB connectivity (§6.1).
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let db_ok = state.sessions.is_connected();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "ready": db_ok })))
}

/// GET /health — server metadata and provider health.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers: Vec<Value> = state
        .agent
        .health()
        .map(|h| {
            h.all_entries()
                .into_iter()
                .map(|e| {
                    json!({
                        "name": e.name,
                        "status": e.status,
                        "avg_latency_ms": e.avg_latency_ms,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Json(json!({
        "status": "ok",
        "version": crate::update::VERSION,
        "git_sha": crate::update::GIT_SHA,
        "protocol": nexus_core::config::PROTOCOL_VERSION,
        "ws_clients": state.ws_clients.len(),
        "providers": providers,
    }))
}
