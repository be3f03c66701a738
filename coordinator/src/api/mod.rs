pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the API router with all endpoints.
///
/// All typed messages share one POST path; GET is reserved for the
/// landing page and health check.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::landing_page))
        .route("/health", get(handlers::health_check))
        .route("/api/message", post(handlers::handle_message))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
