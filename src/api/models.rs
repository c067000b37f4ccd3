//! Request and response bodies of the HTTP surface

use serde::{Deserialize, Serialize};

use crate::games::types::{GameType, RoundRecord, RoundStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub games: Vec<GameHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameHealth {
    pub game_type: GameType,
    pub round_status: RoundStatus,
    pub subscribers: usize,
}

/// `GET /api/:game/rounds?limit=`
#[derive(Debug, Deserialize)]
pub struct RoundsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

pub const MAX_ROUNDS_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundListResponse {
    pub game_type: GameType,
    pub rounds: Vec<RoundRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceEndRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceEndResponse {
    pub game_type: GameType,
    pub accepted: bool,
    pub reason: String,
}

/// `GET /ws/:game?token=`
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: String,
}
