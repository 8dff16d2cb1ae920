//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Resource API prefix, `/apis/<group>/<version>`
pub const API_PREFIX: &str = "/apis/database-mesh.io/v1alpha1";

/// Create the resource API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        .route("/virtualdatabases", get(handlers::list_virtual_databases))
        .route(
            "/namespaces/:namespace/virtualdatabases/:name",
            get(handlers::get_virtual_database).put(handlers::put_virtual_database),
        )
        .route(
            "/namespaces/:namespace/virtualdatabases/:name/dependents",
            get(handlers::list_dependents),
        )
        .route(
            "/namespaces/:namespace/databaseclasses/:name",
            get(handlers::get_database_class).put(handlers::put_database_class),
        )
        .route(
            "/namespaces/:namespace/databaseendpoints/:name",
            get(handlers::get_database_endpoint),
        );

    let router = Router::new()
        .nest(API_PREFIX, api_routes)
        .route("/status", get(handlers::controller_status))
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

/// `/healthz` and `/readyz`
pub fn create_probe_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .with_state(state)
}

/// `/metrics`
pub fn create_metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}
