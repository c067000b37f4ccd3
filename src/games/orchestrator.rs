//! Round orchestrator: one per game type, owns the only mutable round state.
//!
//! `WAITING -> ACTIVE -> SETTLING -> COOLDOWN -> WAITING`
//!
//! Admission, cashout, the engine's tick and settlement all run under the same
//! `tokio::sync::Mutex`, so every request observes exactly one status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::fairness::{self, FairnessEngine, FairnessError, Verification, VerifyRequest, DEFAULT_CLIENT_SEED};
use crate::games::engine::{PlayEnd, RoundContext, RoundEngine, RoundFailure, RoundState};
use crate::games::ledger::{Admission, BetLedger, BetRejection, LedgerTotals, Payout, SettlementReport};
use crate::games::types::{GameType, JoinRequest, Round, RoundEvent, RoundRecord, RoundStatus, RoundView, UserId};
use crate::metrics::RoundMetrics;
use crate::services::{BalanceService, BroadcastGateway, ReadinessSignal, RoundSink};

#[derive(Error, Debug)]
pub enum RoundError {
    #[error("a round is already running for this game")]
    AlreadyRunning,

    #[error("round is {0}, expected waiting")]
    NotWaiting(RoundStatus),

    #[error("no active round")]
    NotActive,

    #[error("fairness: {0}")]
    Fairness(#[from] FairnessError),

    #[error("round failure: {0}")]
    Failure(String),
}

/// Timing and betting parameters of one orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub client_seed: String,
    pub min_bet: f64,
    pub io_timeout: Duration,
    pub waiting_period: Duration,
    pub start_poll_interval: Duration,
    pub cooldown: Duration,
    pub commit_retry_interval: Duration,
    pub first_nonce: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            client_seed: DEFAULT_CLIENT_SEED.to_string(),
            min_bet: 0.1,
            io_timeout: Duration::from_secs(2),
            waiting_period: Duration::from_secs(2),
            start_poll_interval: Duration::from_millis(500),
            cooldown: Duration::from_secs(10),
            commit_retry_interval: Duration::from_secs(1),
            first_nonce: 0,
        }
    }
}

/// External services an orchestrator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub balances: Arc<dyn BalanceService>,
    pub sink: Arc<dyn RoundSink>,
    pub gateway: Arc<dyn BroadcastGateway>,
    pub readiness: Arc<dyn ReadinessSignal>,
    pub metrics: Arc<RoundMetrics>,
}

/// What one completed round looked like
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub record: RoundRecord,
    pub report: SettlementReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

pub struct Orchestrator {
    game_type: GameType,
    engine: Arc<dyn RoundEngine>,
    fairness: FairnessEngine,
    settings: OrchestratorSettings,
    services: Collaborators,
    state: Arc<Mutex<RoundState>>,
    start_guard: Mutex<()>,
    abort: Arc<Notify>,
    next_nonce: AtomicU64,
}

impl Orchestrator {
    /// Commit the first round and return an orchestrator in WAITING
    pub fn new(
        engine: Arc<dyn RoundEngine>,
        fairness: FairnessEngine,
        settings: OrchestratorSettings,
        services: Collaborators,
    ) -> Result<Self, RoundError> {
        let game_type = engine.game_type();
        let commitment = fairness.commit()?;
        let round = Round::new(game_type, commitment, &settings.client_seed, settings.first_nonce);
        let ledger = BetLedger::new(game_type, settings.min_bet, settings.io_timeout);

        info!(
            "🎲 {} orchestrator ready, round {} committed to {}",
            game_type, round.id, round.hashed_server_seed
        );

        Ok(Self {
            game_type,
            engine,
            fairness,
            next_nonce: AtomicU64::new(settings.first_nonce + 1),
            settings,
            services,
            state: Arc::new(Mutex::new(RoundState::new(round, ledger))),
            start_guard: Mutex::new(()),
            abort: Arc::new(Notify::new()),
        })
    }

    pub fn game_type(&self) -> GameType {
        self.game_type
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Drive rounds until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("▶️  Driving {} rounds", self.game_type);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.run_round() => match result {
                    Ok(summary) => debug!(
                        "{} round {} archived ({} bets)",
                        self.game_type,
                        summary.record.id,
                        summary.record.bets.len()
                    ),
                    Err(RoundError::AlreadyRunning) => {
                        warn!("Another driver owns {} rounds, stopping this one", self.game_type);
                        break;
                    }
                    Err(RoundError::NotWaiting(status)) => {
                        warn!("{} round found in {} at start, recovering", self.game_type, status);
                        self.recover().await;
                    }
                    Err(e) => {
                        error!("{} round failed: {}", self.game_type, e);
                        tokio::time::sleep(self.settings.start_poll_interval).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("⏹️  {} orchestrator stopped", self.game_type);
    }

    /// One full cycle: wait for the start trigger, play, settle, cool down and
    /// open the next round.
    pub async fn run_round(&self) -> Result<RoundSummary, RoundError> {
        let _guard = self.start_guard.try_lock().map_err(|_| RoundError::AlreadyRunning)?;

        self.wait_for_start().await;
        self.activate().await?;

        let end = self.engine.play(&self.context()).await;
        let summary = self.settle(end).await?;

        self.cooldown().await;
        self.open_next_round().await;
        Ok(summary)
    }

    pub async fn join(&self, user_id: UserId, request: JoinRequest) -> Result<Admission, BetRejection> {
        let result = self.admit(user_id, &request).await;

        match &result {
            Ok(Admission::Accepted(bet)) => {
                self.services.metrics.record_admitted(self.game_type, bet.amount);
                self.publish(RoundEvent::Joined {
                    user_id,
                    bet_amount: bet.amount,
                    auto_cashout: bet.is_auto_managed().then_some(bet.auto_cashout),
                    category: bet.category,
                });
            }
            Ok(Admission::Queued { position, .. }) => {
                self.services.metrics.record_queued(self.game_type);
                debug!("User {} queued for the next {} round at {}", user_id, self.game_type, position);
            }
            Err(rejection) => {
                self.services.metrics.record_rejected(self.game_type);
                debug!("Rejected {} join from user {}: {}", self.game_type, user_id, rejection);
            }
        }

        result
    }

    /// WAITING rounds debit under the lock; no ticks run then. Any other
    /// status takes the balance pre-check with the lock released and only
    /// touches the queue once it is re-acquired.
    async fn admit(&self, user_id: UserId, request: &JoinRequest) -> Result<Admission, BetRejection> {
        let balances = self.services.balances.as_ref();
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.round.status == RoundStatus::Waiting {
                return state.ledger.admit(&state.round, user_id, request, balances).await;
            }
            state.ledger.check_join(user_id, request)?;
        }

        let available = match tokio::time::timeout(self.settings.io_timeout, balances.balance(user_id)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Balance lookup for user {} exceeded {:?}", user_id, self.settings.io_timeout);
                return Err(BetRejection::BalanceUnavailable(format!(
                    "timed out after {:?}",
                    self.settings.io_timeout
                )));
            }
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.round.status == RoundStatus::Waiting {
            // the next round opened while the lookup was in flight
            return state.ledger.admit(&state.round, user_id, request, balances).await;
        }
        state.ledger.enqueue(&state.round, user_id, request, available)
    }

    /// Manual cashout at the last ticked multiplier
    pub async fn cashout(&self, user_id: UserId) -> Result<Payout, BetRejection> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let result = state
            .ledger
            .cashout(&state.round, user_id, None, self.services.balances.as_ref())
            .await;

        match &result {
            Ok(payout) => {
                self.services.metrics.record_cashout(self.game_type, payout.amount);
                self.publish(RoundEvent::Cashout {
                    user_id,
                    amount: payout.amount,
                    multiplier: payout.multiplier,
                    auto: false,
                });
            }
            Err(rejection) => debug!("Rejected cashout from user {}: {}", user_id, rejection),
        }

        result
    }

    /// End the active round at the next tick boundary. Open bets are forfeited.
    pub async fn force_end(&self, reason: impl Into<String>) -> Result<(), RoundError> {
        let reason = reason.into();
        {
            let mut state = self.state.lock().await;
            if state.round.status != RoundStatus::Active {
                return Err(RoundError::NotActive);
            }
            warn!("Force ending {} round {}: {}", self.game_type, state.round.id, reason);
            state.abort_reason = Some(reason);
        }
        self.abort.notify_one();
        Ok(())
    }

    /// Public view of the current round; never carries an unrevealed seed
    pub async fn snapshot(&self) -> RoundView {
        let state = self.state.lock().await;
        let mut view = state.round.view();
        view.open_bets = state.ledger.open_count();
        view.queued_bets = state.ledger.queued_count();
        view
    }

    pub async fn totals(&self) -> LedgerTotals {
        self.state.lock().await.ledger.totals()
    }

    pub fn verify_round(request: &VerifyRequest) -> Verification {
        fairness::verify(
            &request.server_seed,
            &request.client_seed,
            request.nonce,
            &request.hashed_server_seed,
            request.game_type,
        )
    }

    fn context(&self) -> RoundContext {
        RoundContext {
            state: self.state.clone(),
            balances: self.services.balances.clone(),
            gateway: self.services.gateway.clone(),
            metrics: self.services.metrics.clone(),
            abort: self.abort.clone(),
        }
    }

    fn publish(&self, event: RoundEvent) {
        self.services.gateway.publish(self.game_type, event);
    }

    async fn wait_for_start(&self) {
        tokio::time::sleep(self.settings.waiting_period).await;
        while !self.services.readiness.is_ready(self.game_type) {
            tokio::time::sleep(self.settings.start_poll_interval).await;
        }
    }

    async fn activate(&self) -> Result<(), RoundError> {
        let mut state = self.state.lock().await;
        if state.round.status != RoundStatus::Waiting {
            return Err(RoundError::NotWaiting(state.round.status));
        }

        state.round.status = RoundStatus::Active;
        state.round.started_at = Some(Utc::now());
        state.abort_reason = None;

        self.publish(RoundEvent::GameStart {
            game_type: self.game_type,
            round_id: state.round.id,
            hashed_server_seed: state.round.hashed_server_seed.clone(),
            client_seed: state.round.client_seed.clone(),
            nonce: state.round.nonce,
        });
        info!(
            "🚀 {} round {} started with {} bets (nonce {})",
            self.game_type,
            state.round.id,
            state.ledger.bet_count(),
            state.round.nonce
        );
        Ok(())
    }

    async fn settle(&self, end: Result<PlayEnd, RoundFailure>) -> Result<RoundSummary, RoundError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.end_play();

        let failure = match &end {
            Ok(PlayEnd::Crashed { multiplier }) | Ok(PlayEnd::TimedOut { multiplier }) => {
                state.round.multiplier = *multiplier;
                None
            }
            Ok(PlayEnd::Revealed) => None,
            Err(failure) => {
                error!("❌ {} round {} failed: {}", self.game_type, state.round.id, failure);
                state.round.forced = true;
                state.ledger.forfeit_open_bets();
                Some(failure.to_string())
            }
        };

        state.round.ended_at = Some(Utc::now());
        state.round.reveal();

        self.publish(RoundEvent::GameEnd {
            game_type: self.game_type,
            round_id: state.round.id,
            outcome: *state.round.outcome(),
            server_seed: state.round.revealed_seed().map(str::to_string).unwrap_or_default(),
            client_seed: state.round.client_seed.clone(),
            nonce: state.round.nonce,
            hashed_server_seed: state.round.hashed_server_seed.clone(),
            forced: state.round.forced,
        });

        let report = state
            .ledger
            .settle_open_bets(&state.round, self.services.balances.as_ref())
            .await;
        if report.credited > 0.0 {
            self.services.metrics.record_credit(self.game_type, report.credited);
        }

        let bets = state.ledger.take_bets();
        let record = state
            .round
            .to_record(bets)
            .ok_or_else(|| RoundError::Failure("round record requested before reveal".to_string()))?;

        self.publish(RoundEvent::RoundRecord {
            record: Box::new(record.clone()),
        });

        state.round.status = RoundStatus::Cooldown;
        state.abort_reason = None;
        drop(guard);

        self.persist(&record).await;
        self.services.metrics.record_round(self.game_type, record.forced);

        info!(
            "🏁 {} round {} settled: {} won, {} lost, wagered {:.2}, paid {:.2}",
            self.game_type, record.id, report.won, report.lost, record.total_wagered, record.total_paid
        );

        Ok(RoundSummary {
            record,
            report,
            failure,
        })
    }

    async fn persist(&self, record: &RoundRecord) {
        let timeout = self.settings.io_timeout;
        match tokio::time::timeout(timeout, self.services.sink.record_round(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to archive round {}: {}", record.id, e),
            Err(_) => error!("Archiving round {} exceeded {:?}", record.id, timeout),
        }

        for bet in &record.bets {
            match tokio::time::timeout(timeout, self.services.sink.record_bet(record.id, bet)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to archive bet of user {} in round {}: {}", bet.user_id, record.id, e),
                Err(_) => error!("Archiving bet of user {} in round {} exceeded {:?}", bet.user_id, record.id, timeout),
            }
        }
    }

    async fn cooldown(&self) {
        let mut remaining = self.settings.cooldown;
        let second = Duration::from_secs(1);

        while !remaining.is_zero() {
            self.publish(RoundEvent::Countdown {
                seconds_remaining: remaining.as_secs_f64().ceil() as u64,
            });
            let step = remaining.min(second);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }

    /// Commit the next round (retrying until the seed source recovers) and
    /// re-admit queued bets in FIFO order.
    async fn open_next_round(&self) {
        let commitment = loop {
            match self.fairness.commit() {
                Ok(commitment) => break commitment,
                Err(e) => {
                    error!(
                        "Commit for next {} round failed: {}; retrying in {:?}",
                        self.game_type, e, self.settings.commit_retry_interval
                    );
                    tokio::time::sleep(self.settings.commit_retry_interval).await;
                }
            }
        };
        let nonce = self.next_nonce.fetch_add(1, Ordering::SeqCst);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.round = Round::new(self.game_type, commitment, &self.settings.client_seed, nonce);
        state.abort_reason = None;

        let queued = state.ledger.drain_queue();
        let mut readmitted = 0;
        for pending in queued {
            let user_id = pending.user_id;
            match state
                .ledger
                .admit(&state.round, user_id, &pending.request, self.services.balances.as_ref())
                .await
            {
                Ok(Admission::Accepted(bet)) => {
                    readmitted += 1;
                    self.services.metrics.record_admitted(self.game_type, bet.amount);
                    let joined = RoundEvent::Joined {
                        user_id,
                        bet_amount: bet.amount,
                        auto_cashout: bet.is_auto_managed().then_some(bet.auto_cashout),
                        category: bet.category,
                    };
                    self.services.gateway.send_to(user_id, joined.clone());
                    self.publish(joined);
                }
                Ok(Admission::Queued { .. }) => {
                    warn!("Queued bet of user {} was queued again", user_id);
                }
                Err(rejection) => {
                    self.services.metrics.record_rejected(self.game_type);
                    warn!("Queued bet of user {} rejected on re-admission: {}", user_id, rejection);
                    self.services.gateway.send_to(
                        user_id,
                        RoundEvent::Error {
                            message: format!("Queued bet rejected: {}", rejection),
                        },
                    );
                }
            }
        }

        info!(
            "🆕 {} round {} open for bets (nonce {}, {} re-admitted)",
            self.game_type, state.round.id, nonce, readmitted
        );
    }

    /// Bring a round left mid-flight by a cancelled driver back to WAITING
    async fn recover(&self) {
        let status = self.state.lock().await.round.status;
        if matches!(status, RoundStatus::Active | RoundStatus::Settling) {
            if let Err(e) = self
                .settle(Err(RoundFailure::Aborted("interrupted round".to_string())))
                .await
            {
                error!("Recovering {} round failed: {}", self.game_type, e);
            }
        }
        self.open_next_round().await;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> Arc<Mutex<RoundState>> {
        self.state.clone()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("game_type", &self.game_type)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::{hash_server_seed, FixedSeedSource};
    use crate::gateway::EventHub;
    use crate::games::crash::CrashEngine;
    use crate::games::roulette::RouletteEngine;
    use crate::games::types::{BetStatus, Outcome, RouletteCategory};
    use crate::services::{AlwaysReady, BalanceError, InMemoryBalances, MemoryRoundSink};
    use async_trait::async_trait;
    use std::time::Instant;

    fn fast_settings() -> OrchestratorSettings {
        OrchestratorSettings {
            waiting_period: Duration::ZERO,
            start_poll_interval: Duration::from_millis(5),
            cooldown: Duration::ZERO,
            commit_retry_interval: Duration::from_millis(10),
            io_timeout: Duration::from_millis(500),
            ..OrchestratorSettings::default()
        }
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        balances: Arc<InMemoryBalances>,
        sink: Arc<MemoryRoundSink>,
        hub: Arc<EventHub>,
        seeds: Arc<FixedSeedSource>,
    }

    /// Accounts 1 to 3 hold 100.0 each
    fn harness(engine: Arc<dyn RoundEngine>, seeds: Vec<String>) -> Harness {
        harness_with(engine, seeds, |balances| balances as Arc<dyn BalanceService>)
    }

    /// `wrap` decides which balance service the orchestrator talks to; the
    /// harness keeps the in-memory accounts underneath for assertions.
    fn harness_with<F>(engine: Arc<dyn RoundEngine>, seeds: Vec<String>, wrap: F) -> Harness
    where
        F: FnOnce(Arc<InMemoryBalances>) -> Arc<dyn BalanceService>,
    {
        let balances = Arc::new(InMemoryBalances::with_accounts([(1, 100.0), (2, 100.0), (3, 100.0)]));
        let sink = Arc::new(MemoryRoundSink::new());
        let hub = Arc::new(EventHub::new(1024));
        let seeds = Arc::new(FixedSeedSource::new(seeds));
        let services = Collaborators {
            balances: wrap(balances.clone()),
            sink: sink.clone(),
            gateway: hub.clone(),
            readiness: Arc::new(AlwaysReady),
            metrics: Arc::new(RoundMetrics::new()),
        };
        let orchestrator = Orchestrator::new(engine, FairnessEngine::new(seeds.clone()), fast_settings(), services)
            .expect("first commit");

        Harness {
            orchestrator: Arc::new(orchestrator),
            balances,
            sink,
            hub,
            seeds,
        }
    }

    fn seed(c: char) -> String {
        std::iter::repeat(c).take(32).collect()
    }

    /// Slow balance lookups; debits and credits go straight through
    struct SlowLookups {
        inner: Arc<InMemoryBalances>,
        delay: Duration,
    }

    #[async_trait]
    impl BalanceService for SlowLookups {
        async fn debit(&self, user: UserId, amount: f64) -> Result<(), BalanceError> {
            self.inner.debit(user, amount).await
        }
        async fn credit(&self, user: UserId, amount: f64) -> Result<(), BalanceError> {
            self.inner.credit(user, amount).await
        }
        async fn balance(&self, user: UserId) -> Result<f64, BalanceError> {
            tokio::time::sleep(self.delay).await;
            self.inner.balance(user).await
        }
    }

    /// Debits work, every credit fails
    struct CreditsDown {
        inner: Arc<InMemoryBalances>,
    }

    #[async_trait]
    impl BalanceService for CreditsDown {
        async fn debit(&self, user: UserId, amount: f64) -> Result<(), BalanceError> {
            self.inner.debit(user, amount).await
        }
        async fn credit(&self, _user: UserId, _amount: f64) -> Result<(), BalanceError> {
            Err(BalanceError::Unavailable("credit endpoint down".to_string()))
        }
        async fn balance(&self, user: UserId) -> Result<f64, BalanceError> {
            self.inner.balance(user).await
        }
    }

    async fn wait_until_active(orchestrator: &Orchestrator) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while orchestrator.snapshot().await.status != RoundStatus::Active {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("round became active");
    }

    /// A crash engine that stays well below the 1.84x crash point for a while
    fn slow_crash() -> Arc<CrashEngine> {
        Arc::new(CrashEngine::new(Duration::from_millis(10), 0.01, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn test_roulette_round_settles_and_archives() {
        // "a"*32 at nonce 0 is 23, red
        let h = harness(
            Arc::new(RouletteEngine::new(Duration::from_millis(20))),
            vec![seed('a'), seed('b')],
        );
        h.orchestrator
            .join(1, JoinRequest::roulette(10.0, RouletteCategory::Red))
            .await
            .expect("join");
        h.orchestrator
            .join(2, JoinRequest::roulette(10.0, RouletteCategory::Green))
            .await
            .expect("join");

        let summary = h.orchestrator.run_round().await.expect("round");
        assert_eq!(
            summary.record.outcome,
            Outcome::Roulette {
                number: 23,
                category: RouletteCategory::Red
            }
        );
        assert_eq!(summary.report.won, 1);
        assert_eq!(h.balances.get(1), Some(110.0));
        assert_eq!(h.balances.get(2), Some(90.0));
        assert_eq!(summary.record.hashed_server_seed, hash_server_seed(&seed('a')));
        assert!(fairness::verify_round(&summary.record).is_valid());

        assert_eq!(h.sink.round_count().await, 1);
        assert_eq!(h.sink.bets_for(summary.record.id).await.len(), 2);

        let next = h.orchestrator.snapshot().await;
        assert_eq!(next.status, RoundStatus::Waiting);
        assert_eq!(next.nonce, 1);
        assert_eq!(next.hashed_server_seed, hash_server_seed(&seed('b')));
        assert!(next.server_seed.is_none());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let h = harness(
            Arc::new(RouletteEngine::new(Duration::from_millis(100))),
            vec![seed('a'), seed('b')],
        );
        let driver = h.orchestrator.clone();
        let first = tokio::spawn(async move { driver.run_round().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(h.orchestrator.run_round().await, Err(RoundError::AlreadyRunning)));
        assert!(first.await.expect("task").is_ok());
    }

    #[tokio::test]
    async fn test_force_end_forfeits_open_bets() {
        let h = harness(
            Arc::new(RouletteEngine::new(Duration::from_secs(30))),
            vec![seed('a'), seed('b')],
        );
        let mut events = h.hub.subscribe(GameType::Roulette);
        h.orchestrator
            .join(1, JoinRequest::roulette(10.0, RouletteCategory::Red))
            .await
            .expect("join");

        assert!(matches!(h.orchestrator.force_end("maintenance").await, Err(RoundError::NotActive)));

        let driver = h.orchestrator.clone();
        let round = tokio::spawn(async move { driver.run_round().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.orchestrator.force_end("maintenance").await.expect("force end");

        let summary = tokio::time::timeout(Duration::from_secs(5), round)
            .await
            .expect("round ended promptly")
            .expect("task")
            .expect("round");
        assert!(summary.record.forced);
        assert!(summary.failure.is_some());
        assert_eq!(summary.record.bets[0].status, BetStatus::Lost);
        // the winning category is forfeited too
        assert_eq!(h.balances.get(1), Some(90.0));

        let mut saw_end = false;
        while let Ok(event) = events.try_recv() {
            if let RoundEvent::GameEnd { forced, server_seed, .. } = event {
                assert!(forced);
                assert_eq!(server_seed, seed('a'));
                saw_end = true;
            }
        }
        assert!(saw_end);
    }

    #[tokio::test]
    async fn test_commit_failure_retries_until_seed_available() {
        let h = harness(
            Arc::new(RouletteEngine::new(Duration::from_millis(5))),
            vec![seed('a')],
        );
        let driver = h.orchestrator.clone();
        let round = tokio::spawn(async move { driver.run_round().await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!round.is_finished());
        let stuck = h.orchestrator.snapshot().await;
        assert_eq!(stuck.status, RoundStatus::Cooldown);

        // joins during the stall are queued
        let queued = h
            .orchestrator
            .join(3, JoinRequest::roulette(5.0, RouletteCategory::Black))
            .await
            .expect("queued");
        assert!(matches!(queued, Admission::Queued { position: 1, .. }));

        h.seeds.push(seed('c'));
        tokio::time::timeout(Duration::from_secs(2), round)
            .await
            .expect("recovered")
            .expect("task")
            .expect("round");

        let next = h.orchestrator.snapshot().await;
        assert_eq!(next.status, RoundStatus::Waiting);
        assert_eq!(next.hashed_server_seed, hash_server_seed(&seed('c')));
        assert_eq!(next.open_bets, 1);
        assert_eq!(h.balances.get(3), Some(95.0));
    }

    #[tokio::test]
    async fn test_crash_round_times_out_at_max_duration() {
        // zero growth never reaches the 1.84x crash point, so the round ends
        // at max duration with the multiplier still at 1.0
        let engine = CrashEngine::new(Duration::from_millis(5), 0.0, Duration::from_millis(20));
        let h = harness(Arc::new(engine), vec![seed('a'), seed('b')]);
        h.orchestrator.join(1, JoinRequest::crash(10.0, None)).await.expect("join");

        let summary = h.orchestrator.run_round().await.expect("round");
        assert_eq!(summary.record.bets[0].status, BetStatus::Lost);
        assert_eq!(summary.record.final_multiplier, Some(1.0));
        assert!(!summary.record.forced);
        assert_eq!(h.balances.get(1), Some(90.0));

        let totals = h.orchestrator.totals().await;
        assert_eq!(totals.debited, totals.credited + totals.house_retention);
    }

    #[tokio::test]
    async fn test_state_lock_is_shared_with_engine() {
        let h = harness(
            Arc::new(RouletteEngine::new(Duration::from_millis(5))),
            vec![seed('a'), seed('b')],
        );
        let state = h.orchestrator.state();
        let guard = state.lock().await;
        let join = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.join(1, JoinRequest::roulette(1.0, RouletteCategory::Red)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!join.is_finished());
        drop(guard);
        assert!(join.await.expect("task").is_ok());
    }

    #[tokio::test]
    async fn test_queued_join_does_not_stall_ticks() {
        let h = harness_with(slow_crash(), vec![seed('a'), seed('b')], |inner| {
            Arc::new(SlowLookups {
                inner,
                delay: Duration::from_millis(300),
            }) as Arc<dyn BalanceService>
        });
        let driver = h.orchestrator.clone();
        let round = tokio::spawn(async move { driver.run_round().await });
        wait_until_active(&h.orchestrator).await;

        let mut events = h.hub.subscribe(GameType::Crash);
        let join = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.join(2, JoinRequest::crash(1.0, None)).await })
        };

        let mut last_tick = Instant::now();
        let mut longest_gap = Duration::ZERO;
        let watched = Instant::now();
        while watched.elapsed() < Duration::from_millis(400) {
            match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
                Ok(Ok(RoundEvent::Running { .. })) => {
                    longest_gap = longest_gap.max(last_tick.elapsed());
                    last_tick = Instant::now();
                }
                Ok(Ok(_)) => {}
                other => panic!("tick stream stopped: {:?}", other.map(|r| r.is_ok())),
            }
        }
        assert!(longest_gap < Duration::from_millis(150), "ticks paused for {:?}", longest_gap);

        let admission = join.await.expect("task").expect("queued");
        assert!(matches!(admission, Admission::Queued { position: 1, .. }));
        assert_eq!(h.balances.get(2), Some(100.0));

        h.orchestrator.force_end("test over").await.expect("force end");
        round.await.expect("task").expect("round");

        let next = h.orchestrator.snapshot().await;
        assert_eq!(next.status, RoundStatus::Waiting);
        assert_eq!(next.open_bets, 1);
        assert_eq!(h.balances.get(2), Some(99.0));
    }

    #[tokio::test]
    async fn test_crash_force_end_forfeits_at_next_tick() {
        let h = harness(slow_crash(), vec![seed('a'), seed('b')]);
        let mut events = h.hub.subscribe(GameType::Crash);
        h.orchestrator.join(1, JoinRequest::crash(10.0, None)).await.expect("manual join");
        h.orchestrator
            .join(2, JoinRequest::crash(10.0, Some(5.0)))
            .await
            .expect("auto join");

        let driver = h.orchestrator.clone();
        let round = tokio::spawn(async move { driver.run_round().await });
        wait_until_active(&h.orchestrator).await;
        h.orchestrator.force_end("maintenance").await.expect("force end");

        let summary = tokio::time::timeout(Duration::from_millis(500), round)
            .await
            .expect("round ended at the next tick")
            .expect("task")
            .expect("round");

        assert!(summary.record.forced);
        assert!(summary.failure.as_deref().is_some_and(|f| f.contains("maintenance")));
        assert_eq!(summary.record.server_seed, seed('a'));
        assert!(fairness::verify_round(&summary.record).is_valid());
        assert!(summary.record.bets.iter().all(|b| b.status == BetStatus::Lost));
        assert_eq!(summary.record.total_paid, 0.0);
        assert_eq!(h.balances.get(1), Some(90.0));
        assert_eq!(h.balances.get(2), Some(90.0));

        let totals = h.orchestrator.totals().await;
        assert_eq!(totals.open_stake, 0.0);
        assert_eq!(totals.house_retention, 20.0);

        let mut revealed = None;
        while let Ok(event) = events.try_recv() {
            if let RoundEvent::GameEnd { forced, server_seed, .. } = event {
                assert!(forced);
                revealed = Some(server_seed);
            }
        }
        assert_eq!(revealed, Some(seed('a')));
    }

    #[tokio::test]
    async fn test_crash_auto_cashout_credit_failure_ends_round() {
        let engine = CrashEngine::new(Duration::from_millis(5), 9.0, Duration::from_secs(10));
        let h = harness_with(Arc::new(engine), vec![seed('a'), seed('b')], |inner| {
            Arc::new(CreditsDown { inner }) as Arc<dyn BalanceService>
        });
        h.orchestrator
            .join(1, JoinRequest::crash(10.0, Some(1.5)))
            .await
            .expect("auto join");
        h.orchestrator.join(2, JoinRequest::crash(10.0, None)).await.expect("manual join");

        let summary = h.orchestrator.run_round().await.expect("round");
        assert!(summary.record.forced);
        assert!(summary.failure.is_some());
        assert_eq!(summary.record.server_seed, seed('a'));

        let auto = summary.record.bets.iter().find(|b| b.user_id == 1).expect("auto bet");
        assert_eq!(auto.status, BetStatus::CashedOut);
        assert!(auto.credit_failed);
        assert_eq!(auto.settled_amount, Some(15.0));
        let manual = summary.record.bets.iter().find(|b| b.user_id == 2).expect("manual bet");
        assert_eq!(manual.status, BetStatus::Lost);

        // the record reflects credits actually issued
        assert_eq!(summary.record.total_paid, 0.0);
        assert_eq!(h.balances.get(1), Some(90.0));
        assert_eq!(h.balances.get(2), Some(90.0));

        let archived = h.sink.bets_for(summary.record.id).await;
        assert!(archived.iter().any(|b| b.user_id == 1 && b.credit_failed));

        let totals = h.orchestrator.totals().await;
        assert_eq!(totals.unpaid, 15.0);
        assert_eq!(totals.debited, totals.credited + totals.unpaid + totals.house_retention);
    }
}
