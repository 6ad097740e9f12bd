//! HTTP routes

pub mod webhooks;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/billing", post(webhooks::handle_billing_webhook))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
