//! Metrics endpoints: Prometheus text and a JSON summary

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::handlers::AppState;
use crate::games::types::GameType;
use crate::metrics::GameMetricsSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub uptime_seconds: u64,
    pub websocket_connections: u64,
    pub games: BTreeMap<String, GameMetricsSnapshot>,
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.to_prometheus_format(),
    )
        .into_response()
}

/// GET /metrics/json
pub async fn metrics_json_handler(State(state): State<Arc<AppState>>) -> Json<MetricsSummary> {
    let games = GameType::ALL
        .iter()
        .filter(|game| state.orchestrators.contains_key(*game))
        .map(|game| (game.to_string(), state.metrics.snapshot(*game)))
        .collect();

    Json(MetricsSummary {
        uptime_seconds: state.metrics.uptime_seconds(),
        websocket_connections: state.metrics.websocket_connections(),
        games,
    })
}
