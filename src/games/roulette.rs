//! Roulette: no ticks, the outcome is revealed after a fixed delay

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::games::engine::{PlayEnd, RoundContext, RoundEngine, RoundFailure};
use crate::games::types::GameType;

#[derive(Debug, Clone)]
pub struct RouletteEngine {
    reveal_delay: Duration,
}

impl RouletteEngine {
    pub fn new(reveal_delay: Duration) -> Self {
        Self { reveal_delay }
    }
}

impl Default for RouletteEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl RoundEngine for RouletteEngine {
    fn game_type(&self) -> GameType {
        GameType::Roulette
    }

    async fn play(&self, ctx: &RoundContext) -> Result<PlayEnd, RoundFailure> {
        let deadline = Instant::now() + self.reveal_delay;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = ctx.abort.notified() => {}
            }

            let mut state = ctx.state.lock().await;
            if let Some(reason) = state.abort_reason.clone() {
                state.end_play();
                return Err(RoundFailure::Aborted(reason));
            }
            // a stale wakeup from an earlier round carries no reason
            if Instant::now() >= deadline {
                state.end_play();
                return Ok(PlayEnd::Revealed);
            }
        }
    }
}
