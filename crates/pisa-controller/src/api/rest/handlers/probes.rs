//! Liveness, readiness, status and metrics handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use crate::store::VirtualDatabaseStore;
use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// Liveness: the process is serving requests
pub async fn healthz() -> &'static str {
    "ok"
}

/// Readiness: the controller has synced its initial state
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initial sync not complete")
    }
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ready: bool,
    pub virtual_databases: usize,
}

/// Controller status
pub async fn controller_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let virtual_databases = state.store.list_virtual_databases().await?.len();

    Ok(Json(StatusResponse {
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        ready: state.is_ready(),
        virtual_databases,
    }))
}
