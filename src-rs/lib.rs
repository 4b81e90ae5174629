pub mod config;
pub mod convex;
pub mod directory;
pub mod downgrade;
pub mod error;
pub mod events;
pub mod handlers;
pub mod plans;
pub mod processor;
pub mod reconcile;
pub mod serde_convex;
pub mod signature;
pub mod state;
pub mod stripe_api;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub const WEBHOOK_ROUTE: &str = "/api/webhooks/stripe";

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;

    Router::new()
        .route(WEBHOOK_ROUTE, post(handlers::handle_stripe_webhook))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}
