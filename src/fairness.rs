//! Commit/reveal fairness.
//!
//! A round commits to `sha256(server_seed)` before any bet is taken and reveals
//! the seed once play is over. The outcome is a pure function of
//! `(server_seed, client_seed, nonce)` so anyone holding the revealed values can
//! recompute it.

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::games::types::{GameType, Outcome, RoundRecord, RouletteCategory};

/// Client seed used when none is configured
pub const DEFAULT_CLIENT_SEED: &str = "default_client_seed";

/// Bytes of entropy per server seed (hex encoded to 32 characters)
pub const SERVER_SEED_BYTES: usize = 16;

const CRASH_MODULUS: u32 = 10_000;
const ROULETTE_SLOTS: u32 = 37;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FairnessError {
    #[error("entropy source failed: {0}")]
    Entropy(String),

    #[error("seed source exhausted")]
    Exhausted,

    #[error("invalid seed: {0}")]
    InvalidSeed(String),
}

/// A freshly generated server seed together with its published hash
#[derive(Clone, PartialEq, Eq)]
pub struct Commitment {
    pub server_seed: String,
    pub hashed_server_seed: String,
}

impl std::fmt::Debug for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commitment")
            .field("hashed_server_seed", &self.hashed_server_seed)
            .finish_non_exhaustive()
    }
}

/// Where server seeds come from
pub trait SeedSource: Send + Sync {
    fn next_seed(&self) -> Result<String, FairnessError>;
}

/// Operating system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_seed(&self) -> Result<String, FairnessError> {
        let mut bytes = [0u8; SERVER_SEED_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| FairnessError::Entropy(e.to_string()))?;
        Ok(hex::encode(bytes))
    }
}

/// Replays a fixed list of seeds, then fails with `Exhausted`.
///
/// Used for deterministic replays and in tests.
#[derive(Debug, Default)]
pub struct FixedSeedSource {
    seeds: Mutex<VecDeque<String>>,
}

impl FixedSeedSource {
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: Mutex::new(seeds.into_iter().map(Into::into).collect()),
        }
    }

    pub fn push(&self, seed: impl Into<String>) {
        if let Ok(mut seeds) = self.seeds.lock() {
            seeds.push_back(seed.into());
        }
    }
}

impl SeedSource for FixedSeedSource {
    fn next_seed(&self) -> Result<String, FairnessError> {
        let mut seeds = self
            .seeds
            .lock()
            .map_err(|_| FairnessError::Entropy("seed queue poisoned".to_string()))?;
        seeds.pop_front().ok_or(FairnessError::Exhausted)
    }
}

/// Produces commitments from a pluggable seed source
#[derive(Clone)]
pub struct FairnessEngine {
    source: Arc<dyn SeedSource>,
}

impl FairnessEngine {
    pub fn new(source: Arc<dyn SeedSource>) -> Self {
        Self { source }
    }

    pub fn os() -> Self {
        Self::new(Arc::new(OsSeedSource))
    }

    pub fn commit(&self) -> Result<Commitment, FairnessError> {
        let server_seed = self.source.next_seed()?;
        if server_seed.is_empty() {
            return Err(FairnessError::InvalidSeed("empty server seed".to_string()));
        }
        let hashed_server_seed = hash_server_seed(&server_seed);
        Ok(Commitment {
            server_seed,
            hashed_server_seed,
        })
    }
}

impl std::fmt::Debug for FairnessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairnessEngine").finish_non_exhaustive()
    }
}

/// Lowercase hex sha256 of the seed's bytes
pub fn hash_server_seed(server_seed: &str) -> String {
    hex::encode(Sha256::digest(server_seed.as_bytes()))
}

/// Leading 32 bits of `sha256("{server_seed}-{client_seed}-{nonce}")`
pub fn outcome_number(server_seed: &str, client_seed: &str, nonce: u64) -> u32 {
    let digest = Sha256::digest(format!("{}-{}-{}", server_seed, client_seed, nonce).as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// `max(1.0, 10000 / ((n mod 10000) + 1))`
pub fn crash_point(n: u32) -> f64 {
    let point = CRASH_MODULUS as f64 / ((n % CRASH_MODULUS) as f64 + 1.0);
    point.max(1.0)
}

pub fn roulette_number(n: u32) -> u8 {
    (n % ROULETTE_SLOTS) as u8
}

pub fn derive_outcome(server_seed: &str, client_seed: &str, nonce: u64, game_type: GameType) -> Outcome {
    let n = outcome_number(server_seed, client_seed, nonce);
    match game_type {
        GameType::Crash => Outcome::Crash {
            crash_point: crash_point(n),
        },
        GameType::Roulette => {
            let number = roulette_number(n);
            Outcome::Roulette {
                number,
                category: RouletteCategory::from_number(number),
            }
        }
    }
}

/// Verification query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyRequest {
    pub server_seed: String,
    #[serde(default = "default_client_seed")]
    pub client_seed: String,
    pub nonce: u64,
    pub hashed_server_seed: String,
    pub game_type: GameType,
}

fn default_client_seed() -> String {
    DEFAULT_CLIENT_SEED.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verification {
    /// True iff the recomputed hash equals the published one
    pub valid: bool,
    pub computed_hash: String,
    pub outcome: Outcome,
}

pub fn verify(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    hashed_server_seed: &str,
    game_type: GameType,
) -> Verification {
    let computed_hash = hash_server_seed(server_seed);
    Verification {
        valid: computed_hash.eq_ignore_ascii_case(hashed_server_seed),
        computed_hash,
        outcome: derive_outcome(server_seed, client_seed, nonce, game_type),
    }
}

impl VerifyRequest {
    pub fn verify(&self) -> Verification {
        verify(
            &self.server_seed,
            &self.client_seed,
            self.nonce,
            &self.hashed_server_seed,
            self.game_type,
        )
    }
}

/// Result of auditing a persisted round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordAudit {
    pub hash_matches: bool,
    pub outcome_matches: bool,
    pub recomputed: Outcome,
}

impl RecordAudit {
    pub fn is_valid(&self) -> bool {
        self.hash_matches && self.outcome_matches
    }
}

/// Check a full archived round: hash and published outcome
pub fn verify_round(record: &RoundRecord) -> RecordAudit {
    let check = verify(
        &record.server_seed,
        &record.client_seed,
        record.nonce,
        &record.hashed_server_seed,
        record.game_type,
    );
    RecordAudit {
        hash_matches: check.valid,
        outcome_matches: check.outcome == record.outcome,
        recomputed: check.outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seed_a() -> String {
        "a".repeat(32)
    }

    #[test]
    fn test_hash_vector() {
        assert_eq!(
            hash_server_seed(&seed_a()),
            "3ba3f5f43b92602683c19aee62a20342b084dd5971ddd33808d81a328879a547"
        );
    }

    #[test]
    fn test_outcome_vectors() {
        assert_eq!(outcome_number(&seed_a(), DEFAULT_CLIENT_SEED, 0), 0xc016_4705);
        assert_eq!(outcome_number(&seed_a(), DEFAULT_CLIENT_SEED, 1), 0x40ca_6655);
        assert_eq!(outcome_number(&seed_a(), DEFAULT_CLIENT_SEED, 2), 0xe310_87e8);

        let crash = derive_outcome(&seed_a(), DEFAULT_CLIENT_SEED, 0, GameType::Crash);
        assert_eq!(crash, Outcome::Crash { crash_point: 10000.0 / 5446.0 });

        let roulette = derive_outcome(&seed_a(), DEFAULT_CLIENT_SEED, 0, GameType::Roulette);
        assert_eq!(
            roulette,
            Outcome::Roulette {
                number: 23,
                category: RouletteCategory::Red
            }
        );
    }

    #[test]
    fn test_crash_point_bounds() {
        assert_eq!(crash_point(0), 10000.0);
        assert_eq!(crash_point(9_999), 1.0);
        assert_eq!(crash_point(4_999), 2.0);
    }

    #[test]
    fn test_verify_detects_tampered_hash() {
        let good = verify(&seed_a(), DEFAULT_CLIENT_SEED, 0, &hash_server_seed(&seed_a()), GameType::Crash);
        assert!(good.valid);

        let bad = verify(&seed_a(), DEFAULT_CLIENT_SEED, 0, &"0".repeat(64), GameType::Crash);
        assert!(!bad.valid);
        assert_eq!(bad.outcome, good.outcome);
    }

    #[test]
    fn test_fixed_source_replays_then_exhausts() {
        let engine = FairnessEngine::new(Arc::new(FixedSeedSource::new([seed_a()])));
        let commitment = engine.commit().expect("first seed");
        assert_eq!(commitment.server_seed, seed_a());
        assert_eq!(commitment.hashed_server_seed, hash_server_seed(&seed_a()));
        assert_eq!(engine.commit(), Err(FairnessError::Exhausted));
    }

    #[test]
    fn test_os_source_produces_distinct_seeds() {
        let engine = FairnessEngine::os();
        let a = engine.commit().expect("seed");
        let b = engine.commit().expect("seed");
        assert_eq!(a.server_seed.len(), SERVER_SEED_BYTES * 2);
        assert_ne!(a.server_seed, b.server_seed);
        assert!(!format!("{:?}", a).contains(&a.server_seed));
    }

    proptest! {
        #[test]
        fn crash_point_is_at_least_one(n in any::<u32>()) {
            let point = crash_point(n);
            prop_assert!(point >= 1.0);
            prop_assert!(point <= 10000.0);
        }

        #[test]
        fn outcome_is_deterministic(seed in "[0-9a-f]{32}", client in "[a-z_]{1,24}", nonce in any::<u64>()) {
            let first = derive_outcome(&seed, &client, nonce, GameType::Roulette);
            let second = derive_outcome(&seed, &client, nonce, GameType::Roulette);
            prop_assert_eq!(first, second);
            if let Outcome::Roulette { number, category } = first {
                prop_assert!(number <= 36);
                prop_assert_eq!(category, RouletteCategory::from_number(number));
            }
        }

        #[test]
        fn revealed_seed_always_verifies(seed in "[0-9a-f]{32}", nonce in any::<u64>()) {
            let hashed = hash_server_seed(&seed);
            let check = verify(&seed, DEFAULT_CLIENT_SEED, nonce, &hashed, GameType::Crash);
            prop_assert!(check.valid);
            prop_assert_eq!(check.outcome, derive_outcome(&seed, DEFAULT_CLIENT_SEED, nonce, GameType::Crash));
        }
    }
}
