//! Crash: a multiplier growing as `(1 + r)^t` until the crash point

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::games::engine::{PlayEnd, RoundContext, RoundEngine, RoundFailure};
use crate::games::ledger::BetRejection;
use crate::games::types::{round_two, GameType, RoundEvent};

#[derive(Debug, Clone)]
pub struct CrashEngine {
    tick_interval: Duration,
    growth_rate: f64,
    max_duration: Duration,
}

impl CrashEngine {
    pub fn new(tick_interval: Duration, growth_rate: f64, max_duration: Duration) -> Self {
        Self {
            tick_interval,
            growth_rate,
            max_duration,
        }
    }

    /// Multiplier after `elapsed` seconds
    pub fn multiplier_at(&self, elapsed: f64) -> f64 {
        (1.0 + self.growth_rate).powf(elapsed)
    }

    /// Seconds since start at tick `index` (tick 0 is 1.0x)
    pub fn elapsed_at(&self, index: u64) -> f64 {
        index as f64 * self.tick_interval.as_secs_f64()
    }
}

impl Default for CrashEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), 0.075, Duration::from_secs(100))
    }
}

#[async_trait]
impl RoundEngine for CrashEngine {
    fn game_type(&self) -> GameType {
        GameType::Crash
    }

    async fn play(&self, ctx: &RoundContext) -> Result<PlayEnd, RoundFailure> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_elapsed = self.max_duration.as_secs_f64();
        let mut index: u64 = 0;

        loop {
            ticker.tick().await;
            let elapsed = self.elapsed_at(index);
            let raw = self.multiplier_at(elapsed);

            let mut guard = ctx.state.lock().await;
            let state = &mut *guard;

            if let Some(reason) = state.abort_reason.clone() {
                state.end_play();
                return Err(RoundFailure::Aborted(reason));
            }

            let crash_point = state.round.outcome().crash_point().unwrap_or(1.0);
            let multiplier = raw.min(crash_point);
            state.round.multiplier = multiplier;
            ctx.publish(
                GameType::Crash,
                RoundEvent::Running {
                    multiplier: round_two(multiplier),
                },
            );

            for (user_id, threshold) in state.ledger.due_auto_cashouts(raw, crash_point) {
                match state
                    .ledger
                    .cashout(&state.round, user_id, Some(threshold), ctx.balances.as_ref())
                    .await
                {
                    Ok(payout) => {
                        ctx.metrics.record_cashout(GameType::Crash, payout.amount);
                        ctx.publish(
                            GameType::Crash,
                            RoundEvent::Cashout {
                                user_id,
                                amount: payout.amount,
                                multiplier: payout.multiplier,
                                auto: true,
                            },
                        );
                    }
                    Err(BetRejection::BalanceUnavailable(reason)) => {
                        warn!("Auto cashout for user {} failed in round {}", user_id, state.round.id);
                        state.end_play();
                        return Err(RoundFailure::Balance(reason));
                    }
                    Err(other) => debug!("Skipping auto cashout for user {}: {}", user_id, other),
                }
            }

            if raw >= crash_point {
                info!("💥 Round {} crashed at {:.2}x", state.round.id, crash_point);
                state.end_play();
                return Ok(PlayEnd::Crashed {
                    multiplier: crash_point,
                });
            }

            if elapsed >= max_elapsed {
                warn!(
                    "Round {} hit the {:?} limit at {:.2}x before crashing",
                    state.round.id, self.max_duration, multiplier
                );
                state.end_play();
                return Ok(PlayEnd::TimedOut { multiplier });
            }

            drop(guard);
            index += 1;
        }
    }
}
