//! HTTP request handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    errors::ApiError,
    middleware::RequestId,
    models::*,
};
use crate::fairness::{Verification, VerifyRequest};
use crate::games::orchestrator::{Orchestrator, RoundError};
use crate::games::types::{GameType, RoundRecord, RoundView};
use crate::gateway::EventHub;
use crate::metrics::RoundMetrics;
use crate::services::{IdentityResolver, RoundSink};

/// Shared application state
pub struct AppState {
    pub orchestrators: HashMap<GameType, Arc<Orchestrator>>,
    pub hub: Arc<EventHub>,
    pub identities: Arc<dyn IdentityResolver>,
    pub sink: Arc<dyn RoundSink>,
    pub metrics: Arc<RoundMetrics>,
    pub version: String,
}

impl AppState {
    /// Resolve a `:game` path segment to its running orchestrator
    pub fn orchestrator(&self, request_id: &RequestId, game: &str) -> Result<(GameType, Arc<Orchestrator>), ApiError> {
        let game_type: GameType = game
            .parse()
            .map_err(|e: String| ApiError::bad_request(request_id.0.clone(), e))?;
        let orchestrator = self.orchestrators.get(&game_type).cloned().ok_or_else(|| {
            ApiError::not_found(request_id.0.clone(), format!("{} is not enabled", game_type))
        })?;
        Ok((game_type, orchestrator))
    }
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut games = Vec::with_capacity(state.orchestrators.len());
    for game_type in GameType::ALL {
        if let Some(orchestrator) = state.orchestrators.get(&game_type) {
            games.push(GameHealth {
                game_type,
                round_status: orchestrator.snapshot().await.status,
                subscribers: state.hub.subscriber_count(game_type),
            });
        }
    }

    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        games,
    })
}

/// GET /api/:game/round
pub async fn current_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
) -> Result<Json<RoundView>, ApiError> {
    let (_, orchestrator) = state.orchestrator(&request_id, &game)?;
    Ok(Json(orchestrator.snapshot().await))
}

/// GET /api/:game/rounds?limit={n}
pub async fn recent_rounds_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Query(query): Query<RoundsQuery>,
) -> Result<Json<RoundListResponse>, ApiError> {
    let game_type: GameType = game
        .parse()
        .map_err(|e: String| ApiError::bad_request(request_id.0.clone(), e))?;

    let limit = query.limit.clamp(1, MAX_ROUNDS_LIMIT);
    let rounds = state
        .sink
        .recent_rounds(game_type, limit)
        .await
        .map_err(|e| ApiError::internal_error(request_id.0.clone(), format!("Failed to load rounds: {}", e)))?;

    Ok(Json(RoundListResponse { game_type, rounds }))
}

/// GET /api/rounds/:id
pub async fn round_detail_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RoundRecord>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::bad_request(request_id.0.clone(), format!("Invalid round id: {}", id)))?;

    state
        .sink
        .load_round(id)
        .await
        .map_err(|e| ApiError::internal_error(request_id.0.clone(), format!("Failed to load round: {}", e)))?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(request_id.0.clone(), format!("Round {} not found", id)))
}

/// POST /api/verify
pub async fn verify_handler(Json(request): Json<VerifyRequest>) -> Json<Verification> {
    Json(Orchestrator::verify_round(&request))
}

/// POST /api/:game/force-end
pub async fn force_end_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    body: Option<Json<ForceEndRequest>>,
) -> Result<(StatusCode, Json<ForceEndResponse>), ApiError> {
    let (game_type, orchestrator) = state.orchestrator(&request_id, &game)?;
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "administrative force end".to_string());

    match orchestrator.force_end(reason.clone()).await {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(ForceEndResponse {
                game_type,
                accepted: true,
                reason,
            }),
        )),
        Err(RoundError::NotActive) => Err(ApiError::conflict(
            request_id.0.clone(),
            format!("No active {} round", game_type),
        )),
        Err(e) => Err(ApiError::internal_error(request_id.0.clone(), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::{hash_server_seed, DEFAULT_CLIENT_SEED};
    use crate::games::types::{Outcome, RouletteCategory};
    use crate::services::{InMemoryBalances, MemoryRoundSink, StaticIdentities};

    fn state() -> Arc<AppState> {
        let balances = Arc::new(InMemoryBalances::new());
        Arc::new(AppState {
            orchestrators: HashMap::new(),
            hub: Arc::new(EventHub::default()),
            identities: Arc::new(StaticIdentities::new(HashMap::new(), balances)),
            sink: Arc::new(MemoryRoundSink::new()),
            metrics: Arc::new(RoundMetrics::new()),
            version: "test".to_string(),
        })
    }

    fn request_id() -> Extension<RequestId> {
        Extension(RequestId("test-request".to_string()))
    }

    #[tokio::test]
    async fn test_verify_handler() {
        let seed = "a".repeat(32);
        let Json(verification) = verify_handler(Json(VerifyRequest {
            hashed_server_seed: hash_server_seed(&seed),
            server_seed: seed,
            client_seed: DEFAULT_CLIENT_SEED.to_string(),
            nonce: 0,
            game_type: GameType::Roulette,
        }))
        .await;

        assert!(verification.valid);
        assert_eq!(
            verification.outcome,
            Outcome::Roulette {
                number: 23,
                category: RouletteCategory::Red
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_game_is_bad_request() {
        let result = current_round_handler(request_id(), State(state()), Path("dice".to_string())).await;
        let error = result.err().expect("error");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.request_id, "test-request");
    }

    #[tokio::test]
    async fn test_disabled_game_is_not_found() {
        let result = current_round_handler(request_id(), State(state()), Path("crash".to_string())).await;
        assert_eq!(result.err().expect("error").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_round_detail_lookup() {
        let bad = round_detail_handler(request_id(), State(state()), Path("not-a-uuid".to_string())).await;
        assert_eq!(bad.err().expect("error").status(), StatusCode::BAD_REQUEST);

        let missing = round_detail_handler(request_id(), State(state()), Path(Uuid::new_v4().to_string())).await;
        assert_eq!(missing.err().expect("error").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_recent_rounds_empty() {
        let Json(list) = recent_rounds_handler(
            request_id(),
            State(state()),
            Path("roulette".to_string()),
            Query(RoundsQuery { limit: 500 }),
        )
        .await
        .expect("list");
        assert_eq!(list.game_type, GameType::Roulette);
        assert!(list.rounds.is_empty());
    }
}
