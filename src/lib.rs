//! Roundhouse - provably fair crash and roulette rounds.
//!
//! Each game type runs one round at a time. The server seed of a round is
//! committed (by hash) before any bet is taken and revealed when play ends, so
//! every outcome can be recomputed from `(server_seed, client_seed, nonce)`.

pub mod api;
pub mod config;
pub mod errors;
pub mod factory;
pub mod fairness;
pub mod gateway;
pub mod games;
pub mod metrics;
pub mod services;
pub mod storage;

pub use config::{ConfigLoader, RoundhouseConfig};
pub use errors::{RoundhouseError, RoundhouseResult};
pub use factory::{RoundhouseFactory, Runtime};
pub use fairness::{FairnessEngine, VerifyRequest, Verification};
pub use games::{GameType, Orchestrator, RoundEvent, RoundRecord};
pub use gateway::EventHub;
pub use metrics::RoundMetrics;
pub use storage::RocksRoundStore;
