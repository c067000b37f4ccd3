//! The `RoundEngine` seam between the orchestrator and a game variant.
//!
//! The orchestrator owns the lifecycle (admission, settlement, cooldown). An
//! engine only drives the ACTIVE phase: it returns once the round must settle,
//! and it must have moved the round to SETTLING inside the same critical
//! section that decided so.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::games::ledger::BetLedger;
use crate::games::types::{GameType, Round, RoundEvent, RoundStatus};
use crate::metrics::RoundMetrics;
use crate::services::{BalanceService, BroadcastGateway};

/// Everything mutable about the current round, behind one lock
pub struct RoundState {
    pub round: Round,
    pub ledger: BetLedger,
    /// Set by `force_end`; checked at every tick boundary
    pub abort_reason: Option<String>,
}

impl RoundState {
    pub fn new(round: Round, ledger: BetLedger) -> Self {
        Self {
            round,
            ledger,
            abort_reason: None,
        }
    }

    /// Leave ACTIVE. Cashouts and joins that take the lock afterwards see
    /// SETTLING.
    pub fn end_play(&mut self) {
        self.round.status = RoundStatus::Settling;
    }
}

/// Handles an engine needs while a round is ACTIVE
#[derive(Clone)]
pub struct RoundContext {
    pub state: Arc<Mutex<RoundState>>,
    pub balances: Arc<dyn BalanceService>,
    pub gateway: Arc<dyn BroadcastGateway>,
    pub metrics: Arc<RoundMetrics>,
    /// Woken by `force_end`
    pub abort: Arc<Notify>,
}

impl RoundContext {
    pub fn publish(&self, game_type: GameType, event: RoundEvent) {
        self.gateway.publish(game_type, event);
    }
}

/// How the ACTIVE phase ended without a failure
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayEnd {
    /// The multiplier reached the crash point
    Crashed { multiplier: f64 },
    /// `max_duration` elapsed first; open bets lose
    TimedOut { multiplier: f64 },
    /// The roulette reveal delay elapsed
    Revealed,
}

/// Fatal to the round instance only. Open bets are forfeited and the round
/// still goes through reveal and cooldown.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoundFailure {
    #[error("round aborted: {0}")]
    Aborted(String),

    #[error("balance failure during auto cashout: {0}")]
    Balance(String),
}

#[async_trait]
pub trait RoundEngine: Send + Sync {
    fn game_type(&self) -> GameType;

    /// Drive the ACTIVE phase. Called with the round already ACTIVE.
    async fn play(&self, ctx: &RoundContext) -> Result<PlayEnd, RoundFailure>;
}
