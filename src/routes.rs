//! Route definitions for the settlement API

use axum::{
    routing::{get, post},
    Router,
};

use crate::app_state::AppState;
use crate::handlers::*;

// Settlement routes
pub fn settlement_routes() -> Router<AppState> {
    Router::new()
        .route("/api/settlements", post(settle))
        .route("/api/settlements/cancel", post(cancel_settlement))
        .route("/api/settlements/:attempt_id", get(get_attempt))
        .route("/api/settlements/:attempt_id/ack", post(acknowledge_attempt))
}

// Premium routes
pub fn premium_routes() -> Router<AppState> {
    Router::new().route("/api/premium/quote", post(quote_premium))
}

// Outcome stream
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws/outcomes", get(outcomes_ws))
}

async fn root() -> &'static str {
    "Seedflow Settlement API Server"
}

async fn health_check() -> &'static str {
    "OK"
}

/// Full router with state applied. Layers are added by the binary.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(settlement_routes())
        .merge(premium_routes())
        .merge(ws_routes())
        .with_state(state)
}
