//! Round engines and their shared bookkeeping.
//!
//! `orchestrator` drives the lifecycle, `ledger` owns the bets, and each
//! `RoundEngine` (crash, roulette) only decides when play ends.

pub mod crash;
pub mod engine;
pub mod ledger;
pub mod orchestrator;
pub mod roulette;
pub mod types;

pub use crash::CrashEngine;
pub use engine::{PlayEnd, RoundContext, RoundEngine, RoundFailure};
pub use ledger::{Admission, BetLedger, BetRejection, LedgerTotals, Payout, SettlementReport};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorSettings, RoundError, RoundSummary};
pub use roulette::RouletteEngine;
pub use types::*;
