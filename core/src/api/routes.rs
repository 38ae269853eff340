//! API Routes
//!
//! Router configuration for the HTTP API.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::handlers::{self, ApiState};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    let mut router = Router::new()
        // Health & configuration
        .route("/health", get(handlers::health))
        .route("/denominations", get(handlers::denominations))
        .route("/split", post(handlers::split))
        // Institutions
        .route("/institutions", post(handlers::register_institution))
        .route("/institutions/connect", post(handlers::connect_institutions))
        .route("/institutions/{id}", get(handlers::get_institution))
        .route("/institutions/{id}/balance", get(handlers::balance))
        // Transfers
        .route(
            "/transfers",
            get(handlers::list_transfers).post(handlers::create_transfer),
        )
        .route("/transfers/{id}", get(handlers::get_transfer))
        .route(
            "/transfers/{id}/legs/{leg}/retry",
            post(handlers::retry_leg),
        );

    if state.dev_mode {
        router = router.route("/institutions/mint", post(handlers::mint));
    }

    router
        // CORS
        .layer(CorsLayer::permissive())
        .with_state(state)
}
