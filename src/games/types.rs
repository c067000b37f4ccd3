use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::fairness::{self, Commitment};

/// Participant identifier as resolved by the identity collaborator
pub type UserId = u64;

/// Supported game types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Crash,
    Roulette,
}

impl GameType {
    pub const ALL: [GameType; 2] = [GameType::Crash, GameType::Roulette];
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameType::Crash => write!(f, "crash"),
            GameType::Roulette => write!(f, "roulette"),
        }
    }
}

impl FromStr for GameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crash" => Ok(GameType::Crash),
            "roulette" => Ok(GameType::Roulette),
            other => Err(format!("unknown game type '{}'", other)),
        }
    }
}

/// Roulette colour category, the only thing a roulette bet can be placed on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RouletteCategory {
    Green,
    Bait,
    Red,
    Black,
}

impl RouletteCategory {
    /// Category of a wheel number (0-36)
    pub fn from_number(number: u8) -> Self {
        match number {
            0 => RouletteCategory::Green,
            1 | 36 => RouletteCategory::Bait,
            n if n % 2 == 1 => RouletteCategory::Red,
            _ => RouletteCategory::Black,
        }
    }

    /// Total return multiplier for a winning bet (stake included)
    pub fn payout_multiplier(&self) -> f64 {
        match self {
            RouletteCategory::Green => 14.0,
            RouletteCategory::Bait => 7.0,
            RouletteCategory::Red | RouletteCategory::Black => 2.0,
        }
    }
}

impl fmt::Display for RouletteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouletteCategory::Green => write!(f, "green"),
            RouletteCategory::Bait => write!(f, "bait"),
            RouletteCategory::Red => write!(f, "red"),
            RouletteCategory::Black => write!(f, "black"),
        }
    }
}

/// Deterministic result of a round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum Outcome {
    Crash { crash_point: f64 },
    Roulette { number: u8, category: RouletteCategory },
}

impl Outcome {
    pub fn crash_point(&self) -> Option<f64> {
        match self {
            Outcome::Crash { crash_point } => Some(*crash_point),
            Outcome::Roulette { .. } => None,
        }
    }
}

/// Round lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Waiting,
    Active,
    Settling,
    Cooldown,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Waiting => write!(f, "waiting"),
            RoundStatus::Active => write!(f, "active"),
            RoundStatus::Settling => write!(f, "settling"),
            RoundStatus::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// One play cycle of a game type, from commit to settlement.
///
/// The server seed and the outcome are known from construction but are only
/// exposed through [`Round::view`] and [`Round::to_record`] once the round has
/// been revealed. `Round` is deliberately not `Serialize`.
#[derive(Clone)]
pub struct Round {
    pub id: Uuid,
    pub game_type: GameType,
    server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub hashed_server_seed: String,
    outcome: Outcome,
    pub status: RoundStatus,
    /// Last ticked crash multiplier (1.0 for roulette)
    pub multiplier: f64,
    pub revealed: bool,
    pub forced: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Round {
    /// Build a WAITING round from a fresh commitment
    pub fn new(game_type: GameType, commitment: Commitment, client_seed: &str, nonce: u64) -> Self {
        let outcome = fairness::derive_outcome(&commitment.server_seed, client_seed, nonce, game_type);

        Self {
            id: Uuid::new_v4(),
            game_type,
            server_seed: commitment.server_seed,
            client_seed: client_seed.to_string(),
            nonce,
            hashed_server_seed: commitment.hashed_server_seed,
            outcome,
            status: RoundStatus::Waiting,
            multiplier: 1.0,
            revealed: false,
            forced: false,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Outcome as known to the server. Not for publication before reveal.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn reveal(&mut self) {
        self.revealed = true;
    }

    pub fn revealed_seed(&self) -> Option<&str> {
        self.revealed.then_some(self.server_seed.as_str())
    }

    /// Public view; the seed and outcome only appear after reveal
    pub fn view(&self) -> RoundView {
        RoundView {
            id: self.id,
            game_type: self.game_type,
            status: self.status,
            hashed_server_seed: self.hashed_server_seed.clone(),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
            multiplier: match self.game_type {
                GameType::Crash => Some(round_two(self.multiplier)),
                GameType::Roulette => None,
            },
            server_seed: self.revealed_seed().map(str::to_string),
            outcome: self.revealed.then_some(self.outcome),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            open_bets: 0,
            queued_bets: 0,
        }
    }

    /// Archive record. Returns `None` until the round has been revealed.
    pub fn to_record(&self, bets: Vec<Bet>) -> Option<RoundRecord> {
        if !self.revealed {
            return None;
        }

        let total_wagered = bets.iter().map(|b| b.amount).sum();
        let total_paid = bets.iter().filter_map(Bet::paid_amount).sum();

        Some(RoundRecord {
            id: self.id,
            game_type: self.game_type,
            server_seed: self.server_seed.clone(),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
            hashed_server_seed: self.hashed_server_seed.clone(),
            outcome: self.outcome,
            final_multiplier: match self.game_type {
                GameType::Crash => Some(round_two(self.multiplier)),
                GameType::Roulette => None,
            },
            forced: self.forced,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            total_wagered,
            total_paid,
            bets,
        })
    }
}

impl fmt::Debug for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Round")
            .field("id", &self.id)
            .field("game_type", &self.game_type)
            .field("nonce", &self.nonce)
            .field("hashed_server_seed", &self.hashed_server_seed)
            .field("status", &self.status)
            .field("multiplier", &self.multiplier)
            .field("revealed", &self.revealed)
            .field("forced", &self.forced)
            .finish_non_exhaustive()
    }
}

/// Public snapshot of a round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundView {
    pub id: Uuid,
    pub game_type: GameType,
    pub status: RoundStatus,
    pub hashed_server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub open_bets: usize,
    pub queued_bets: usize,
}

/// Immutable archive of a settled round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundRecord {
    pub id: Uuid,
    pub game_type: GameType,
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub hashed_server_seed: String,
    pub outcome: Outcome,
    pub final_multiplier: Option<f64>,
    pub forced: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_wagered: f64,
    pub total_paid: f64,
    pub bets: Vec<Bet>,
}

/// Inbound join command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinRequest {
    pub bet_amount: f64,
    /// Crash only; `None` or `0` means manual cashout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cashout: Option<f64>,
    /// Roulette only
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub category: Option<RouletteCategory>,
}

impl JoinRequest {
    pub fn crash(bet_amount: f64, auto_cashout: Option<f64>) -> Self {
        Self {
            bet_amount,
            auto_cashout,
            category: None,
        }
    }

    pub fn roulette(bet_amount: f64, category: RouletteCategory) -> Self {
        Self {
            bet_amount,
            auto_cashout: None,
            category: Some(category),
        }
    }

    /// Threshold with the "0 means manual" convention applied
    pub fn threshold(&self) -> f64 {
        self.auto_cashout.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Open,
    CashedOut,
    Won,
    Lost,
}

/// A wager accepted into a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub user_id: UserId,
    pub amount: f64,
    /// 0 means manual cashout
    pub auto_cashout: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<RouletteCategory>,
    pub status: BetStatus,
    pub settled_multiplier: Option<f64>,
    pub settled_amount: Option<f64>,
    /// The payout was owed but the credit did not go through
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub credit_failed: bool,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    pub fn new(user_id: UserId, request: &JoinRequest) -> Self {
        Self {
            user_id,
            amount: request.bet_amount,
            auto_cashout: request.threshold(),
            category: request.category,
            status: BetStatus::Open,
            settled_multiplier: None,
            settled_amount: None,
            credit_failed: false,
            placed_at: Utc::now(),
            settled_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == BetStatus::Open
    }

    pub fn cashed_out(&self) -> bool {
        self.status == BetStatus::CashedOut
    }

    pub fn is_auto_managed(&self) -> bool {
        self.auto_cashout != 0.0
    }

    /// Amount actually credited to the user
    pub fn paid_amount(&self) -> Option<f64> {
        if self.credit_failed {
            None
        } else {
            self.settled_amount
        }
    }

    /// Terminal transition. Returns false (and changes nothing) when the bet
    /// is already settled.
    pub(crate) fn settle(&mut self, status: BetStatus, multiplier: f64, amount: f64) -> bool {
        if !self.is_open() || status == BetStatus::Open {
            return false;
        }
        self.status = status;
        self.settled_multiplier = Some(multiplier);
        self.settled_amount = Some(amount);
        self.settled_at = Some(Utc::now());
        true
    }
}

/// Join request parked until the next round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingBet {
    pub sequence: u64,
    pub user_id: UserId,
    pub request: JoinRequest,
    pub submitted_at: DateTime<Utc>,
}

/// Events fanned out to subscribers of a game type, or sent to one user.
///
/// The `status` tag mirrors the messages the web client already understands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundEvent {
    Connected,
    GameStart {
        game_type: GameType,
        round_id: Uuid,
        hashed_server_seed: String,
        client_seed: String,
        nonce: u64,
    },
    Running {
        multiplier: f64,
    },
    Joined {
        user_id: UserId,
        bet_amount: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        auto_cashout: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<RouletteCategory>,
    },
    InQueue {
        user_id: UserId,
        position: usize,
        message: String,
    },
    Cashout {
        user_id: UserId,
        amount: f64,
        multiplier: f64,
        auto: bool,
    },
    GameEnd {
        game_type: GameType,
        round_id: Uuid,
        outcome: Outcome,
        server_seed: String,
        client_seed: String,
        nonce: u64,
        hashed_server_seed: String,
        forced: bool,
    },
    RoundRecord {
        record: Box<RoundRecord>,
    },
    Countdown {
        seconds_remaining: u64,
    },
    Error {
        message: String,
    },
}

/// Two-decimal rounding for displayed multipliers
pub fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Two-decimal truncation for manual cashouts, never above `value`. The
/// epsilon keeps exact decimals like 1.15 from dropping a cent.
pub fn floor_two(value: f64) -> f64 {
    ((value * 100.0) + 1e-9).floor() / 100.0
}
