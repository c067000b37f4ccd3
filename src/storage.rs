//! RocksDB-backed round archive.
//!
//! Values are JSON. Keys:
//! - `round:id:<uuid>` -> `RoundRecord`
//! - `round:bet:<uuid>:<user be>` -> `Bet`
//! - `round:index:<game>:<inverted end millis be><uuid bytes>` -> empty, newest first

use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::StorageError;
use crate::games::types::{Bet, GameType, RoundRecord};
use crate::services::{RoundSink, SinkError};

const ROUND_PREFIX: &str = "round:id:";
const BET_PREFIX: &str = "round:bet:";
const INDEX_PREFIX: &str = "round:index:";

#[derive(Clone)]
pub struct RocksRoundStore {
    db: Arc<DB>,
}

fn round_key(id: Uuid) -> Vec<u8> {
    format!("{}{}", ROUND_PREFIX, id).into_bytes()
}

fn bet_prefix(round_id: Uuid) -> Vec<u8> {
    format!("{}{}:", BET_PREFIX, round_id).into_bytes()
}

fn bet_key(round_id: Uuid, user_id: u64) -> Vec<u8> {
    let mut key = bet_prefix(round_id);
    key.extend_from_slice(&user_id.to_be_bytes());
    key
}

fn index_prefix(game_type: GameType) -> Vec<u8> {
    format!("{}{}:", INDEX_PREFIX, game_type).into_bytes()
}

fn index_key(record: &RoundRecord) -> Vec<u8> {
    // newest first: invert the end time so a forward scan walks back in time
    let ended = record
        .ended_at
        .unwrap_or(record.created_at)
        .timestamp_millis()
        .max(0) as u64;
    let mut key = index_prefix(record.game_type);
    key.extend_from_slice(&(u64::MAX - ended).to_be_bytes());
    key.extend_from_slice(record.id.as_bytes());
    key
}

impl RocksRoundStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, SinkError> {
        let Some(bytes) = self.db.get(key).map_err(|e| SinkError::Read(e.to_string()))? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SinkError::Corrupted(format!("{}: {}", String::from_utf8_lossy(key), e)))
    }

    /// Keys (and values) under `prefix`, in key order, at most `limit`
    fn scan_prefix(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, SinkError> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| SinkError::Read(e.to_string()))?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key, value));
        }
        Ok(rows)
    }

    /// Bets archived individually for a round, by user id
    pub fn load_bets(&self, round_id: Uuid) -> Result<Vec<Bet>, SinkError> {
        self.scan_prefix(&bet_prefix(round_id), usize::MAX)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(|e| SinkError::Corrupted(e.to_string())))
            .collect()
    }

    /// Highest nonce archived for a game type, used to continue the sequence
    /// after a restart
    pub fn last_nonce(&self, game_type: GameType) -> Result<Option<u64>, SinkError> {
        let latest = self.scan_prefix(&index_prefix(game_type), 1)?;
        match latest.first() {
            Some((key, _)) => Ok(self.load_by_index_key(key)?.map(|record| record.nonce)),
            None => Ok(None),
        }
    }

    fn load_by_index_key(&self, key: &[u8]) -> Result<Option<RoundRecord>, SinkError> {
        if key.len() < 16 {
            return Err(SinkError::Corrupted("short index key".to_string()));
        }
        let id = Uuid::from_slice(&key[key.len() - 16..]).map_err(|e| SinkError::Corrupted(e.to_string()))?;
        self.get_json(&round_key(id))
    }
}

#[async_trait]
impl RoundSink for RocksRoundStore {
    async fn record_round(&self, record: &RoundRecord) -> Result<(), SinkError> {
        let bytes = serde_json::to_vec(record).map_err(|e| SinkError::Write(e.to_string()))?;

        let mut batch = WriteBatch::default();
        batch.put(round_key(record.id), bytes);
        batch.put(index_key(record), b"");
        self.db.write(batch).map_err(|e| SinkError::Write(e.to_string()))
    }

    async fn record_bet(&self, round_id: Uuid, bet: &Bet) -> Result<(), SinkError> {
        let bytes = serde_json::to_vec(bet).map_err(|e| SinkError::Write(e.to_string()))?;
        self.db
            .put(bet_key(round_id, bet.user_id), bytes)
            .map_err(|e| SinkError::Write(e.to_string()))
    }

    async fn load_round(&self, id: Uuid) -> Result<Option<RoundRecord>, SinkError> {
        self.get_json(&round_key(id))
    }

    async fn recent_rounds(&self, game_type: GameType, limit: usize) -> Result<Vec<RoundRecord>, SinkError> {
        let mut records = Vec::new();
        for (key, _) in self.scan_prefix(&index_prefix(game_type), limit)? {
            if let Some(record) = self.load_by_index_key(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::{hash_server_seed, Commitment, DEFAULT_CLIENT_SEED};
    use crate::games::types::{JoinRequest, Round};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn record(game_type: GameType, nonce: u64, ended_secs_ago: i64) -> RoundRecord {
        let seed = format!("{:032x}", nonce);
        let commitment = Commitment {
            hashed_server_seed: hash_server_seed(&seed),
            server_seed: seed,
        };
        let mut round = Round::new(game_type, commitment, DEFAULT_CLIENT_SEED, nonce);
        round.ended_at = Some(Utc::now() - Duration::seconds(ended_secs_ago));
        round.reveal();
        let bets = vec![Bet::new(1, &JoinRequest::crash(2.0, None))];
        round.to_record(bets).expect("revealed")
    }

    #[tokio::test]
    async fn test_round_roundtrip_and_index_order() {
        let dir = TempDir::new().expect("tempdir");
        let store = RocksRoundStore::open(dir.path()).expect("open");

        let older = record(GameType::Crash, 0, 30);
        let newer = record(GameType::Crash, 1, 5);
        let other = record(GameType::Roulette, 0, 1);
        for r in [&older, &newer, &other] {
            store.record_round(r).await.expect("write");
        }

        let loaded = store.load_round(older.id).await.expect("read").expect("present");
        assert_eq!(loaded.hashed_server_seed, older.hashed_server_seed);
        assert_eq!(loaded.bets.len(), 1);

        let recent = store.recent_rounds(GameType::Crash, 10).await.expect("scan");
        let ids: Vec<Uuid> = recent.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        assert_eq!(store.recent_rounds(GameType::Crash, 1).await.expect("scan").len(), 1);
        assert_eq!(store.last_nonce(GameType::Crash).expect("nonce"), Some(1));
        assert!(store.load_round(Uuid::new_v4()).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_bets_are_archived_per_user() {
        let dir = TempDir::new().expect("tempdir");
        let store = RocksRoundStore::open(dir.path()).expect("open");
        let round_id = Uuid::new_v4();

        store
            .record_bet(round_id, &Bet::new(2, &JoinRequest::crash(1.0, None)))
            .await
            .expect("write");
        store
            .record_bet(round_id, &Bet::new(1, &JoinRequest::crash(3.0, Some(2.0))))
            .await
            .expect("write");

        let bets = store.load_bets(round_id).expect("scan");
        assert_eq!(bets.iter().map(|b| b.user_id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(store.load_bets(Uuid::new_v4()).expect("scan").is_empty());
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let dir = TempDir::new().expect("tempdir");
        let r = record(GameType::Roulette, 4, 0);
        {
            let store = RocksRoundStore::open(dir.path()).expect("open");
            store.record_round(&r).await.expect("write");
        }
        let store = RocksRoundStore::open(dir.path()).expect("reopen");
        assert_eq!(store.last_nonce(GameType::Roulette).expect("nonce"), Some(4));
    }
}
