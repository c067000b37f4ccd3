//! Wires configuration into a running set of orchestrators.
//!
//! Binaries and integration tests share this so there is one place that
//! decides which sink, readiness signal and engines a game gets.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::AppState;
use crate::config::RoundhouseConfig;
use crate::errors::{RoundhouseResult, StorageError};
use crate::fairness::FairnessEngine;
use crate::games::{Collaborators, CrashEngine, GameType, Orchestrator, RoundEngine, RouletteEngine};
use crate::gateway::EventHub;
use crate::metrics::RoundMetrics;
use crate::services::{AlwaysReady, InMemoryBalances, MemoryRoundSink, ReadinessSignal, RoundSink, StaticIdentities};
use crate::storage::RocksRoundStore;

/// Everything a server needs, built from one configuration
pub struct Runtime {
    pub state: Arc<AppState>,
    pub balances: Arc<InMemoryBalances>,
    pub store: Option<RocksRoundStore>,
}

impl Runtime {
    /// Start one driver task per enabled game; flip `shutdown` to stop them
    pub fn spawn_drivers(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.state
            .orchestrators
            .values()
            .map(|orchestrator| tokio::spawn(orchestrator.clone().run(shutdown.clone())))
            .collect()
    }
}

pub struct RoundhouseFactory;

impl RoundhouseFactory {
    /// Build the runtime. The configuration must already be validated.
    pub fn build(config: &RoundhouseConfig, fairness: FairnessEngine) -> RoundhouseResult<Runtime> {
        let balances = Arc::new(InMemoryBalances::new());
        let mut tokens = HashMap::new();
        for user in &config.identities.users {
            balances.open_account(user.user_id, user.balance.unwrap_or(config.identities.default_balance));
            tokens.insert(user.token.clone(), user.user_id);
        }
        let identities = Arc::new(StaticIdentities::new(tokens, balances.clone()));

        let (sink, store): (Arc<dyn RoundSink>, Option<RocksRoundStore>) = if config.storage.in_memory {
            info!("💾 Using in-memory round archive");
            (Arc::new(MemoryRoundSink::new()), None)
        } else {
            let store = RocksRoundStore::open(&config.storage.data_dir)?;
            info!("💾 Round archive at {}", config.storage.data_dir);
            (Arc::new(store.clone()), Some(store))
        };

        let hub = Arc::new(EventHub::new(config.server.event_buffer));
        let metrics = Arc::new(RoundMetrics::new());
        let readiness: Arc<dyn ReadinessSignal> = if config.rounds.require_subscribers {
            hub.clone()
        } else {
            Arc::new(AlwaysReady)
        };

        let mut orchestrators = HashMap::new();
        for game_type in GameType::ALL {
            let engine: Arc<dyn RoundEngine> = match game_type {
                GameType::Crash if config.crash.enabled => Arc::new(CrashEngine::new(
                    config.tick_interval(),
                    config.crash.growth_rate,
                    config.max_duration(),
                )),
                GameType::Roulette if config.roulette.enabled => Arc::new(RouletteEngine::new(config.reveal_delay())),
                _ => continue,
            };

            let first_nonce = match &store {
                Some(store) => store
                    .last_nonce(game_type)
                    .map_err(|e| StorageError::ReadFailed(e.to_string()))?
                    .map(|nonce| nonce + 1)
                    .unwrap_or(0),
                None => 0,
            };

            let services = Collaborators {
                balances: balances.clone(),
                sink: sink.clone(),
                gateway: hub.clone(),
                readiness: readiness.clone(),
                metrics: metrics.clone(),
            };
            let orchestrator = Orchestrator::new(
                engine,
                fairness.clone(),
                config.orchestrator_settings(first_nonce),
                services,
            )?;
            orchestrators.insert(game_type, Arc::new(orchestrator));
        }

        let state = Arc::new(AppState {
            orchestrators,
            hub,
            identities,
            sink,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        Ok(Runtime { state, balances, store })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::FixedSeedSource;
    use tempfile::TempDir;

    fn seeds() -> FairnessEngine {
        FairnessEngine::new(Arc::new(FixedSeedSource::new(["a".repeat(32), "b".repeat(32)])))
    }

    #[test]
    fn test_development_runtime() {
        let config = RoundhouseConfig::development();
        let runtime = RoundhouseFactory::build(&config, seeds()).expect("runtime");

        assert_eq!(runtime.state.orchestrators.len(), 2);
        assert!(runtime.store.is_none());
        assert_eq!(runtime.balances.get(1), Some(1_000.0));
        assert_eq!(runtime.balances.get(2), Some(1_000.0));
    }

    #[test]
    fn test_disabled_game_is_skipped() {
        let mut config = RoundhouseConfig::development();
        config.crash.enabled = false;
        let runtime = RoundhouseFactory::build(&config, seeds()).expect("runtime");

        assert!(runtime.state.orchestrators.contains_key(&GameType::Roulette));
        assert!(!runtime.state.orchestrators.contains_key(&GameType::Crash));
    }

    #[test]
    fn test_rocks_archive_is_opened() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = RoundhouseConfig::development();
        config.storage.in_memory = false;
        config.storage.data_dir = dir.path().join("rounds").to_string_lossy().to_string();

        let runtime = RoundhouseFactory::build(&config, seeds()).expect("runtime");
        assert!(runtime.store.is_some());
    }
}
