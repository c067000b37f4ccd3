//! Bet ledger: admission, queueing, cashout and settlement for one game type.
//!
//! The ledger never decides *when* things happen. The orchestrator calls into
//! it while holding the round lock, passing the current [`Round`] so every
//! check sees the same status the caller does.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::games::types::{
    floor_two, Bet, BetStatus, GameType, JoinRequest, Outcome, PendingBet, Round, RoundStatus, UserId,
};
use crate::services::{BalanceError, BalanceService};

/// Reasons a join or cashout is refused. None of them change ledger state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BetRejection {
    #[error("{0}")]
    Validation(String),

    #[error("insufficient funds: bet {requested}, available {available}")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error("already joined this round")]
    AlreadyJoined,

    #[error("no open bet in this round")]
    NoOpenBet,

    #[error("bet already settled")]
    AlreadySettled,

    #[error("auto cashout is set for this bet")]
    AutoCashoutManaged,

    #[error("round is not running")]
    RoundEnded,

    #[error("round is not accepting bets")]
    BettingClosed,

    #[error("bet cannot be cashed out")]
    NotCashable,

    #[error("balance service unavailable: {0}")]
    BalanceUnavailable(String),
}

impl From<BalanceError> for BetRejection {
    fn from(e: BalanceError) -> Self {
        match e {
            BalanceError::InsufficientFunds { requested, available } => {
                BetRejection::InsufficientFunds { requested, available }
            }
            other => BetRejection::BalanceUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Debited and recorded in the current round
    Accepted(Bet),
    /// Parked for the next round; `position` is 1-based
    Queued { pending: PendingBet, position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub user_id: UserId,
    pub multiplier: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub won: usize,
    pub lost: usize,
    pub credited: f64,
    /// Credits that failed; the bets stay settled and carry `credit_failed`
    pub failures: Vec<(UserId, String)>,
}

/// Cumulative money flow through a ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub debited: f64,
    pub credited: f64,
    pub open_stake: f64,
    pub unpaid: f64,
    pub house_retention: f64,
}

pub struct BetLedger {
    game_type: GameType,
    min_bet: f64,
    io_timeout: Duration,
    bets: HashMap<UserId, Bet>,
    queue: VecDeque<PendingBet>,
    next_sequence: u64,
    total_debited: f64,
    total_credited: f64,
    unpaid: Vec<(UserId, f64)>,
}

impl BetLedger {
    pub fn new(game_type: GameType, min_bet: f64, io_timeout: Duration) -> Self {
        Self {
            game_type,
            min_bet,
            io_timeout,
            bets: HashMap::new(),
            queue: VecDeque::new(),
            next_sequence: 0,
            total_debited: 0.0,
            total_credited: 0.0,
            unpaid: Vec::new(),
        }
    }

    /// Checks that do not depend on ledger state. Returns the request with
    /// fields that do not apply to this game type cleared.
    pub fn validate(&self, request: &JoinRequest) -> Result<JoinRequest, BetRejection> {
        let amount = request.bet_amount;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(BetRejection::Validation("Bet amount must be a positive number".to_string()));
        }
        if amount < self.min_bet {
            return Err(BetRejection::Validation(format!("Minimum bet amount is {}", self.min_bet)));
        }

        match self.game_type {
            GameType::Crash => {
                let threshold = request.threshold();
                if threshold != 0.0 && (!threshold.is_finite() || threshold <= 1.0) {
                    return Err(BetRejection::Validation(
                        "Auto cashout must be greater than 1.0".to_string(),
                    ));
                }
                Ok(JoinRequest::crash(amount, (threshold != 0.0).then_some(threshold)))
            }
            GameType::Roulette => {
                if request.threshold() != 0.0 {
                    return Err(BetRejection::Validation(
                        "Auto cashout is not available for roulette".to_string(),
                    ));
                }
                let category = request
                    .category
                    .ok_or_else(|| BetRejection::Validation("Bet type is required".to_string()))?;
                Ok(JoinRequest::roulette(amount, category))
            }
        }
    }

    /// Validation plus the duplicate check, without touching balances
    pub fn check_join(&self, user_id: UserId, request: &JoinRequest) -> Result<JoinRequest, BetRejection> {
        let request = self.validate(request)?;
        if self.bets.contains_key(&user_id) || self.queue.iter().any(|p| p.user_id == user_id) {
            return Err(BetRejection::AlreadyJoined);
        }
        Ok(request)
    }

    /// Debit and record a bet in a WAITING round.
    pub async fn admit(
        &mut self,
        round: &Round,
        user_id: UserId,
        request: &JoinRequest,
        balances: &dyn BalanceService,
    ) -> Result<Admission, BetRejection> {
        let request = self.check_join(user_id, request)?;
        if round.status != RoundStatus::Waiting {
            return Err(BetRejection::BettingClosed);
        }

        self.bounded(balances.debit(user_id, request.bet_amount)).await?;
        self.total_debited += request.bet_amount;

        let bet = Bet::new(user_id, &request);
        self.bets.insert(user_id, bet.clone());
        debug!("Admitted {} bet of {} for user {} in round {}", self.game_type, bet.amount, user_id, round.id);
        Ok(Admission::Accepted(bet))
    }

    /// Park a request for the next round. `available` comes from a balance
    /// lookup the caller made without holding the round lock; nothing here
    /// awaits.
    pub fn enqueue(
        &mut self,
        round: &Round,
        user_id: UserId,
        request: &JoinRequest,
        available: f64,
    ) -> Result<Admission, BetRejection> {
        let request = self.check_join(user_id, request)?;
        if request.bet_amount > available {
            return Err(BetRejection::InsufficientFunds {
                requested: request.bet_amount,
                available,
            });
        }

        self.next_sequence += 1;
        let pending = PendingBet {
            sequence: self.next_sequence,
            user_id,
            request,
            submitted_at: Utc::now(),
        };
        self.queue.push_back(pending.clone());
        debug!(
            "Queued {} bet for user {} behind round {} (position {})",
            self.game_type,
            user_id,
            round.id,
            self.queue.len()
        );
        Ok(Admission::Queued {
            pending,
            position: self.queue.len(),
        })
    }

    /// Settle one crash bet at `multiplier_override`, or at the round's last
    /// ticked multiplier truncated to two decimals for a manual cashout.
    ///
    /// The bet is marked before the credit is awaited, so a second attempt
    /// sees `AlreadySettled` whatever the credit's fate.
    pub async fn cashout(
        &mut self,
        round: &Round,
        user_id: UserId,
        multiplier_override: Option<f64>,
        balances: &dyn BalanceService,
    ) -> Result<Payout, BetRejection> {
        if round.status != RoundStatus::Active {
            return Err(BetRejection::RoundEnded);
        }

        let bet = self.bets.get_mut(&user_id).ok_or(BetRejection::NoOpenBet)?;
        if !bet.is_open() {
            return Err(BetRejection::AlreadySettled);
        }
        if round.game_type != GameType::Crash {
            return Err(BetRejection::NotCashable);
        }
        if multiplier_override.is_none() && bet.is_auto_managed() {
            return Err(BetRejection::AutoCashoutManaged);
        }

        let multiplier = multiplier_override.unwrap_or_else(|| floor_two(round.multiplier));
        let amount = bet.amount * multiplier;
        bet.settle(BetStatus::CashedOut, multiplier, amount);

        match self.bounded(balances.credit(user_id, amount)).await {
            Ok(()) => {
                self.total_credited += amount;
                Ok(Payout {
                    user_id,
                    multiplier,
                    amount,
                })
            }
            Err(e) => {
                error!(
                    "Credit of {} to user {} failed in round {}: {}",
                    amount, user_id, round.id, e
                );
                self.mark_unpaid(user_id, amount);
                Err(BetRejection::BalanceUnavailable(e.to_string()))
            }
        }
    }

    /// Open crash bets whose threshold has been reached at `multiplier`
    /// and does not exceed the crash point, ordered by user id.
    pub fn due_auto_cashouts(&self, multiplier: f64, crash_point: f64) -> Vec<(UserId, f64)> {
        let mut due: Vec<(UserId, f64)> = self
            .bets
            .values()
            .filter(|bet| bet.is_open() && bet.is_auto_managed())
            .filter(|bet| bet.auto_cashout <= multiplier && bet.auto_cashout <= crash_point)
            .map(|bet| (bet.user_id, bet.auto_cashout))
            .collect();
        due.sort_by_key(|(user, _)| *user);
        due
    }

    /// Terminal transition for every open bet. All marks happen before any
    /// credit is issued.
    pub async fn settle_open_bets(&mut self, round: &Round, balances: &dyn BalanceService) -> SettlementReport {
        let mut report = SettlementReport::default();
        let mut credits = Vec::new();

        for bet in self.bets.values_mut().filter(|bet| bet.is_open()) {
            match round.outcome() {
                Outcome::Roulette { category, .. } if bet.category == Some(*category) => {
                    let multiplier = category.payout_multiplier();
                    let amount = bet.amount * multiplier;
                    bet.settle(BetStatus::Won, multiplier, amount);
                    credits.push((bet.user_id, amount));
                    report.won += 1;
                }
                _ => {
                    bet.settle(BetStatus::Lost, 0.0, 0.0);
                    report.lost += 1;
                }
            }
        }

        credits.sort_by_key(|(user, _)| *user);
        for (user_id, amount) in credits {
            match self.bounded(balances.credit(user_id, amount)).await {
                Ok(()) => {
                    self.total_credited += amount;
                    report.credited += amount;
                }
                Err(e) => {
                    error!("Settlement credit of {} to user {} failed in round {}: {}", amount, user_id, round.id, e);
                    self.mark_unpaid(user_id, amount);
                    report.failures.push((user_id, e.to_string()));
                }
            }
        }

        report
    }

    /// Failure path: every open bet is lost and its stake retained
    pub fn forfeit_open_bets(&mut self) -> usize {
        let mut forfeited = 0;
        for bet in self.bets.values_mut().filter(|bet| bet.is_open()) {
            bet.settle(BetStatus::Lost, 0.0, 0.0);
            forfeited += 1;
        }
        if forfeited > 0 {
            warn!("Forfeited {} open {} bets", forfeited, self.game_type);
        }
        forfeited
    }

    /// Queue contents in FIFO order; the queue is left empty
    pub fn drain_queue(&mut self) -> Vec<PendingBet> {
        self.queue.drain(..).collect()
    }

    /// Remove the finished round's bets, sorted by placement time
    pub fn take_bets(&mut self) -> Vec<Bet> {
        let mut bets: Vec<Bet> = self.bets.drain().map(|(_, bet)| bet).collect();
        bets.sort_by(|a, b| a.placed_at.cmp(&b.placed_at).then(a.user_id.cmp(&b.user_id)));
        bets
    }

    pub fn bet(&self, user_id: UserId) -> Option<&Bet> {
        self.bets.get(&user_id)
    }

    pub fn open_count(&self) -> usize {
        self.bets.values().filter(|bet| bet.is_open()).count()
    }

    pub fn bet_count(&self) -> usize {
        self.bets.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn total_debited(&self) -> f64 {
        self.total_debited
    }

    pub fn total_credited(&self) -> f64 {
        self.total_credited
    }

    /// Stakes still riding on open bets
    pub fn open_stake(&self) -> f64 {
        self.bets.values().filter(|bet| bet.is_open()).map(|bet| bet.amount).sum()
    }

    /// Debited money the house kept: debits less credits, open stakes and
    /// payouts owed but not delivered
    pub fn house_retention(&self) -> f64 {
        let unpaid: f64 = self.unpaid.iter().map(|(_, amount)| amount).sum();
        self.total_debited - self.total_credited - self.open_stake() - unpaid
    }

    pub fn totals(&self) -> LedgerTotals {
        LedgerTotals {
            debited: self.total_debited,
            credited: self.total_credited,
            open_stake: self.open_stake(),
            unpaid: self.unpaid.iter().map(|(_, amount)| amount).sum(),
            house_retention: self.house_retention(),
        }
    }

    fn mark_unpaid(&mut self, user_id: UserId, amount: f64) {
        if let Some(bet) = self.bets.get_mut(&user_id) {
            bet.credit_failed = true;
        }
        self.unpaid.push((user_id, amount));
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, BalanceError>>) -> Result<T, BalanceError> {
        match tokio::time::timeout(self.io_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Balance call exceeded {:?}", self.io_timeout);
                Err(BalanceError::Unavailable(format!("timed out after {:?}", self.io_timeout)))
            }
        }
    }
}
