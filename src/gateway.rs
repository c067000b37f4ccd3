//! In-process broadcast gateway.
//!
//! One `broadcast` channel per game type carries round events to every
//! connected subscriber. Direct notices (queue results, rejected
//! re-admissions) go through a per-connection `mpsc` sender registered under
//! the user's id.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::games::types::{GameType, RoundEvent, UserId};
use crate::services::{BroadcastGateway, ReadinessSignal};

const DIRECT_CHANNEL_CAPACITY: usize = 64;

pub struct EventHub {
    channels: HashMap<GameType, broadcast::Sender<RoundEvent>>,
    direct: DashMap<UserId, Vec<(u64, mpsc::Sender<RoundEvent>)>>,
    next_connection: AtomicU64,
}

/// Registration handle for one connection's direct notices
pub struct DirectInbox {
    pub connection_id: u64,
    pub user_id: UserId,
    pub receiver: mpsc::Receiver<RoundEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let channels = GameType::ALL
            .iter()
            .map(|game| (*game, broadcast::channel(capacity.max(1)).0))
            .collect();

        Self {
            channels,
            direct: DashMap::new(),
            next_connection: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, game_type: GameType) -> broadcast::Receiver<RoundEvent> {
        match self.channels.get(&game_type) {
            Some(sender) => sender.subscribe(),
            // Every game type gets a channel in `new`
            None => broadcast::channel(1).1,
        }
    }

    pub fn subscriber_count(&self, game_type: GameType) -> usize {
        self.channels
            .get(&game_type)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub fn register(&self, user_id: UserId) -> DirectInbox {
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(DIRECT_CHANNEL_CAPACITY);
        self.direct.entry(user_id).or_default().push((connection_id, tx));

        DirectInbox {
            connection_id,
            user_id,
            receiver: rx,
        }
    }

    pub fn unregister(&self, user_id: UserId, connection_id: u64) {
        let now_empty = match self.direct.get_mut(&user_id) {
            Some(mut senders) => {
                senders.retain(|(id, _)| *id != connection_id);
                senders.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.direct.remove_if(&user_id, |_, senders| senders.is_empty());
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl BroadcastGateway for EventHub {
    fn publish(&self, game_type: GameType, event: RoundEvent) -> usize {
        match self.channels.get(&game_type) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    fn send_to(&self, user: UserId, event: RoundEvent) -> bool {
        let Some(senders) = self.direct.get(&user) else {
            return false;
        };

        let mut delivered = false;
        for (connection_id, sender) in senders.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered = true,
                Err(e) => debug!("Dropping notice for user {} on connection {}: {}", user, connection_id, e),
            }
        }
        delivered
    }
}

impl ReadinessSignal for EventHub {
    fn is_ready(&self, game_type: GameType) -> bool {
        self.subscriber_count(game_type) > 0
    }
}
