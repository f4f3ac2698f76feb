//! # vibe-api
//!
//! The HTTP routing layer for the Store Vibe Generator.

pub mod handlers;
pub mod middleware;

use axum::routing::{get, post};
use axum::Router;

pub use handlers::AppState;

/// Builds the application router.
///
/// # Developer Note
/// The binary may `nest_service` extra routes (e.g. archived image files)
/// on top of the returned router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate-vibe", post(handlers::generate_vibe))
        .route("/api/explore-vibes", get(handlers::explore_vibes))
        .route("/api/modes", get(handlers::list_modes))
        .route("/api/vibes/{seo_id}", get(handlers::vibe_detail))
        // Short permalink: /v/allbirds-2a2da9
        .route("/v/{seo_id}", get(handlers::permalink_redirect))
        .route("/healthz", get(handlers::healthz))
        .layer(middleware::cors_policy())
        .layer(middleware::trace_layer())
        .with_state(state)
}
