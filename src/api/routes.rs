//! Route table

use super::{
    handlers::*,
    monitoring::{metrics_handler, metrics_json_handler},
    websocket::ws_handler,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Rounds
        .route("/api/:game/round", get(current_round_handler))
        .route("/api/:game/rounds", get(recent_rounds_handler))
        .route("/api/:game/force-end", post(force_end_handler))
        .route("/api/rounds/:id", get(round_detail_handler))
        .route("/api/verify", post(verify_handler))
        // Live play
        .route("/ws/:game", get(ws_handler))
        // Prometheus
        .route("/metrics", get(metrics_handler))
        .route("/metrics/json", get(metrics_json_handler))
        .with_state(state)
}
