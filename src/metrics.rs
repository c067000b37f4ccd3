//! Round and bet counters, rendered in the Prometheus text format

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::games::types::GameType;

/// Money is tracked in thousandths so it fits an atomic integer
const MILLI: f64 = 1000.0;

#[derive(Debug, Default)]
struct GameCounters {
    rounds_completed: AtomicU64,
    rounds_forced: AtomicU64,
    bets_admitted: AtomicU64,
    bets_queued: AtomicU64,
    bets_rejected: AtomicU64,
    cashouts: AtomicU64,
    debited_milli: AtomicU64,
    credited_milli: AtomicU64,
}

#[derive(Debug)]
pub struct RoundMetrics {
    started: Instant,
    crash: GameCounters,
    roulette: GameCounters,
    websocket_connections: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GameMetricsSnapshot {
    pub rounds_completed: u64,
    pub rounds_forced: u64,
    pub bets_admitted: u64,
    pub bets_queued: u64,
    pub bets_rejected: u64,
    pub cashouts: u64,
    pub total_debited: f64,
    pub total_credited: f64,
}

impl Default for RoundMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            crash: GameCounters::default(),
            roulette: GameCounters::default(),
            websocket_connections: AtomicU64::new(0),
        }
    }

    fn counters(&self, game_type: GameType) -> &GameCounters {
        match game_type {
            GameType::Crash => &self.crash,
            GameType::Roulette => &self.roulette,
        }
    }

    pub fn record_round(&self, game_type: GameType, forced: bool) {
        let counters = self.counters(game_type);
        counters.rounds_completed.fetch_add(1, Ordering::Relaxed);
        if forced {
            counters.rounds_forced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_admitted(&self, game_type: GameType, amount: f64) {
        let counters = self.counters(game_type);
        counters.bets_admitted.fetch_add(1, Ordering::Relaxed);
        counters.debited_milli.fetch_add(to_milli(amount), Ordering::Relaxed);
    }

    pub fn record_queued(&self, game_type: GameType) {
        self.counters(game_type).bets_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, game_type: GameType) {
        self.counters(game_type).bets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cashout(&self, game_type: GameType, amount: f64) {
        let counters = self.counters(game_type);
        counters.cashouts.fetch_add(1, Ordering::Relaxed);
        counters.credited_milli.fetch_add(to_milli(amount), Ordering::Relaxed);
    }

    pub fn record_credit(&self, game_type: GameType, amount: f64) {
        self.counters(game_type)
            .credited_milli
            .fetch_add(to_milli(amount), Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .websocket_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn websocket_connections(&self) -> u64 {
        self.websocket_connections.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn snapshot(&self, game_type: GameType) -> GameMetricsSnapshot {
        let c = self.counters(game_type);
        GameMetricsSnapshot {
            rounds_completed: c.rounds_completed.load(Ordering::Relaxed),
            rounds_forced: c.rounds_forced.load(Ordering::Relaxed),
            bets_admitted: c.bets_admitted.load(Ordering::Relaxed),
            bets_queued: c.bets_queued.load(Ordering::Relaxed),
            bets_rejected: c.bets_rejected.load(Ordering::Relaxed),
            cashouts: c.cashouts.load(Ordering::Relaxed),
            total_debited: c.debited_milli.load(Ordering::Relaxed) as f64 / MILLI,
            total_credited: c.credited_milli.load(Ordering::Relaxed) as f64 / MILLI,
        }
    }

    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        let families: [(&str, &str, &str, fn(&GameMetricsSnapshot) -> String); 8] = [
            ("rounds_total", "counter", "Rounds settled", |s| s.rounds_completed.to_string()),
            ("rounds_forced_total", "counter", "Rounds ended through the failure path", |s| {
                s.rounds_forced.to_string()
            }),
            ("bets_admitted_total", "counter", "Bets debited into a round", |s| s.bets_admitted.to_string()),
            ("bets_queued_total", "counter", "Bets parked for the next round", |s| s.bets_queued.to_string()),
            ("bets_rejected_total", "counter", "Join requests refused", |s| s.bets_rejected.to_string()),
            ("cashouts_total", "counter", "Crash bets cashed out", |s| s.cashouts.to_string()),
            ("debited_total", "counter", "Stake debited", |s| format!("{:.3}", s.total_debited)),
            ("credited_total", "counter", "Winnings credited", |s| format!("{:.3}", s.total_credited)),
        ];

        let snapshots: Vec<(GameType, GameMetricsSnapshot)> =
            GameType::ALL.iter().map(|g| (*g, self.snapshot(*g))).collect();

        for (name, kind, help, value) in families.iter() {
            output.push_str(&format!(
                "# HELP roundhouse_{name} {help}\n# TYPE roundhouse_{name} {kind}\n"
            ));
            for (game, snapshot) in &snapshots {
                output.push_str(&format!("roundhouse_{name}{{game=\"{game}\"}} {}\n", value(snapshot)));
            }
            output.push('\n');
        }

        output.push_str(&format!(
            "# HELP roundhouse_websocket_connections_active Open WebSocket connections\n\
             # TYPE roundhouse_websocket_connections_active gauge\n\
             roundhouse_websocket_connections_active {}\n\n",
            self.websocket_connections()
        ));

        output.push_str(&format!(
            "# HELP roundhouse_uptime_seconds Seconds since start\n\
             # TYPE roundhouse_uptime_seconds gauge\n\
             roundhouse_uptime_seconds {}\n",
            self.uptime_seconds()
        ));

        output
    }
}

fn to_milli(amount: f64) -> u64 {
    if amount.is_finite() && amount > 0.0 {
        (amount * MILLI).round() as u64
    } else {
        0
    }
}
