//! Router setup with all API routes and middleware.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/instances", get(handlers::list_instances))
        .route("/instances/count", get(handlers::count_instances))
        .route("/instances/{id}", get(handlers::get_instance))
        .route("/groups", get(handlers::list_groups))
        .route("/groups/count", get(handlers::count_groups))
        .route("/groups/{name}", get(handlers::get_group))
        .route("/customers/{id}", get(handlers::get_customer))
        .route("/events", post(handlers::ingest_event))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
