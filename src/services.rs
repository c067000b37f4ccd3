//! Collaborator interfaces consumed by the round core, with in-process
//! reference implementations.
//!
//! The orchestrator only ever sees the traits. The binary wires the
//! implementations below (and `RocksRoundStore` / `EventHub`) together.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::games::types::{Bet, GameType, RoundEvent, RoundRecord, UserId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BalanceError {
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("invalid amount {0}")]
    InvalidAmount(f64),

    #[error("balance service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("round store write failed: {0}")]
    Write(String),

    #[error("round store read failed: {0}")]
    Read(String),

    #[error("corrupted round data: {0}")]
    Corrupted(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("identity lookup failed: {0}")]
    Lookup(String),
}

/// Resolved caller of a connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub user_id: UserId,
    pub balance: f64,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Session, AuthError>;
}

/// Atomic per-user debit/credit
#[async_trait]
pub trait BalanceService: Send + Sync {
    async fn debit(&self, user: UserId, amount: f64) -> Result<(), BalanceError>;
    async fn credit(&self, user: UserId, amount: f64) -> Result<(), BalanceError>;
    async fn balance(&self, user: UserId) -> Result<f64, BalanceError>;
}

/// Durable archive of settled rounds
#[async_trait]
pub trait RoundSink: Send + Sync {
    async fn record_round(&self, record: &RoundRecord) -> Result<(), SinkError>;
    async fn record_bet(&self, round_id: Uuid, bet: &Bet) -> Result<(), SinkError>;
    async fn load_round(&self, id: Uuid) -> Result<Option<RoundRecord>, SinkError>;

    /// Most recent archived rounds of a game type, newest first
    async fn recent_rounds(&self, game_type: GameType, limit: usize) -> Result<Vec<RoundRecord>, SinkError>;
}

/// Fan-out to subscribers of a game type, or to a single user
pub trait BroadcastGateway: Send + Sync {
    /// Returns the number of subscribers that received the event
    fn publish(&self, game_type: GameType, event: RoundEvent) -> usize;

    /// Returns false when the user has no live connection
    fn send_to(&self, user: UserId, event: RoundEvent) -> bool;
}

pub trait ReadinessSignal: Send + Sync {
    fn is_ready(&self, game_type: GameType) -> bool;
}

/// Readiness that never blocks a round start
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReady;

impl ReadinessSignal for AlwaysReady {
    fn is_ready(&self, _game_type: GameType) -> bool {
        true
    }
}

/// In-memory balances keyed by user.
///
/// Each debit/credit runs under the shard lock of the user's entry, so the
/// check-and-subtract is atomic per user.
#[derive(Debug, Default)]
pub struct InMemoryBalances {
    accounts: DashMap<UserId, f64>,
}

impl InMemoryBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts<I: IntoIterator<Item = (UserId, f64)>>(accounts: I) -> Self {
        let balances = Self::new();
        for (user, amount) in accounts {
            balances.accounts.insert(user, amount);
        }
        balances
    }

    pub fn open_account(&self, user: UserId, amount: f64) {
        self.accounts.entry(user).or_insert(amount);
    }

    pub fn get(&self, user: UserId) -> Option<f64> {
        self.accounts.get(&user).map(|b| *b)
    }

    pub fn total(&self) -> f64 {
        self.accounts.iter().map(|entry| *entry.value()).sum()
    }
}

#[async_trait]
impl BalanceService for InMemoryBalances {
    async fn debit(&self, user: UserId, amount: f64) -> Result<(), BalanceError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(BalanceError::InvalidAmount(amount));
        }
        let mut entry = self
            .accounts
            .get_mut(&user)
            .ok_or(BalanceError::UnknownUser(user))?;
        if *entry < amount {
            return Err(BalanceError::InsufficientFunds {
                requested: amount,
                available: *entry,
            });
        }
        *entry -= amount;
        Ok(())
    }

    async fn credit(&self, user: UserId, amount: f64) -> Result<(), BalanceError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(BalanceError::InvalidAmount(amount));
        }
        let mut entry = self
            .accounts
            .get_mut(&user)
            .ok_or(BalanceError::UnknownUser(user))?;
        *entry += amount;
        Ok(())
    }

    async fn balance(&self, user: UserId) -> Result<f64, BalanceError> {
        self.get(user).ok_or(BalanceError::UnknownUser(user))
    }
}

/// Token table identity resolver; balances come from the balance service
pub struct StaticIdentities {
    tokens: HashMap<String, UserId>,
    balances: Arc<dyn BalanceService>,
}

impl StaticIdentities {
    pub fn new(tokens: HashMap<String, UserId>, balances: Arc<dyn BalanceService>) -> Self {
        Self { tokens, balances }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentities {
    async fn resolve(&self, token: &str) -> Result<Session, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let user_id = *self.tokens.get(token).ok_or(AuthError::InvalidToken)?;
        let balance = self
            .balances
            .balance(user_id)
            .await
            .map_err(|e| AuthError::Lookup(e.to_string()))?;
        Ok(Session { user_id, balance })
    }
}

/// Volatile round archive used with `--memory-store` and in tests
#[derive(Debug, Default)]
pub struct MemoryRoundSink {
    rounds: RwLock<Vec<RoundRecord>>,
    bets: RwLock<HashMap<Uuid, Vec<Bet>>>,
}

impl MemoryRoundSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn round_count(&self) -> usize {
        self.rounds.read().await.len()
    }

    pub async fn bets_for(&self, round_id: Uuid) -> Vec<Bet> {
        self.bets.read().await.get(&round_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RoundSink for MemoryRoundSink {
    async fn record_round(&self, record: &RoundRecord) -> Result<(), SinkError> {
        let mut rounds = self.rounds.write().await;
        rounds.retain(|r| r.id != record.id);
        rounds.push(record.clone());
        Ok(())
    }

    async fn record_bet(&self, round_id: Uuid, bet: &Bet) -> Result<(), SinkError> {
        let mut bets = self.bets.write().await;
        let entry = bets.entry(round_id).or_default();
        entry.retain(|b| b.user_id != bet.user_id);
        entry.push(bet.clone());
        Ok(())
    }

    async fn load_round(&self, id: Uuid) -> Result<Option<RoundRecord>, SinkError> {
        Ok(self.rounds.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn recent_rounds(&self, game_type: GameType, limit: usize) -> Result<Vec<RoundRecord>, SinkError> {
        Ok(self
            .rounds
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| r.game_type == game_type)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_debit_is_checked() {
        let balances = InMemoryBalances::with_accounts([(1, 10.0)]);

        balances.debit(1, 4.0).await.expect("debit");
        assert_eq!(balances.get(1), Some(6.0));

        let err = balances.debit(1, 7.0).await.unwrap_err();
        assert!(matches!(err, BalanceError::InsufficientFunds { .. }));
        assert_eq!(balances.get(1), Some(6.0));

        assert_eq!(balances.debit(2, 1.0).await, Err(BalanceError::UnknownUser(2)));
        assert_eq!(balances.debit(1, -1.0).await, Err(BalanceError::InvalidAmount(-1.0)));
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let balances = Arc::new(InMemoryBalances::with_accounts([(1, 10.0)]));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let balances = balances.clone();
            handles.push(tokio::spawn(async move { balances.debit(1, 1.0).await.is_ok() }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.expect("task") {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 10);
        assert_eq!(balances.get(1), Some(0.0));
    }

    #[tokio::test]
    async fn test_static_identities() {
        let balances = Arc::new(InMemoryBalances::with_accounts([(42, 100.0)]));
        let mut tokens = HashMap::new();
        tokens.insert("alice-token".to_string(), 42);
        let identities = StaticIdentities::new(tokens, balances);

        let session = identities.resolve("alice-token").await.expect("session");
        assert_eq!(session, Session { user_id: 42, balance: 100.0 });
        assert_eq!(identities.resolve("nope").await, Err(AuthError::InvalidToken));
        assert_eq!(identities.resolve("").await, Err(AuthError::MissingToken));
    }
}
