//! WebSocket surface for live rounds.
//!
//! `GET /ws/:game?token=` upgrades first and authenticates afterwards, so a
//! bad token gets a readable `{"error": ...}` frame before the close. After
//! that the connection carries:
//! - every broadcast `RoundEvent` of the game
//! - direct notices for this user (queue results, failed re-admissions)
//! - replies to the client's own `join` / `cashout` commands

use super::{errors::ApiError, handlers::AppState, middleware::RequestId, models::WsQuery};
use crate::games::ledger::Admission;
use crate::games::orchestrator::Orchestrator;
use crate::games::types::{GameType, JoinRequest, RoundEvent, RoundStatus, UserId};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const REPLY_CHANNEL_CAPACITY: usize = 32;

/// Commands a client may send over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    Join(JoinRequest),
    Cashout,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let (game_type, orchestrator) = state.orchestrator(&request_id, &game)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, game_type, orchestrator, query.token)))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    game_type: GameType,
    orchestrator: Arc<Orchestrator>,
    token: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let session = match state.identities.resolve(&token).await {
        Ok(session) => session,
        Err(e) => {
            debug!("Rejecting {} socket: {}", game_type, e);
            let body = serde_json::json!({ "error": "Authentication failed" }).to_string();
            let _ = sender.send(Message::Text(body)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let user_id = session.user_id;

    // Subscribe before the snapshot so nothing published in between is lost
    let mut events = state.hub.subscribe(game_type);
    let mut inbox = state.hub.register(user_id);
    let connection_id = inbox.connection_id;
    state.metrics.connection_opened();

    info!(
        "🔌 User {} connected to {} (balance {:.2})",
        user_id, game_type, session.balance
    );

    let mut greeting = vec![RoundEvent::Connected];
    let view = orchestrator.snapshot().await;
    if view.status == RoundStatus::Active {
        greeting.push(RoundEvent::GameStart {
            game_type,
            round_id: view.id,
            hashed_server_seed: view.hashed_server_seed,
            client_seed: view.client_seed,
            nonce: view.nonce,
        });
    }

    for event in &greeting {
        let Some(message) = encode(event) else { continue };
        if sender.send(message).await.is_err() {
            state.hub.unregister(user_id, connection_id);
            state.metrics.connection_closed();
            return;
        }
    }

    let (reply_tx, mut reply_rx) = mpsc::channel::<RoundEvent>(REPLY_CHANNEL_CAPACITY);

    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(reply) = handle_command(&orchestrator, user_id, &text).await {
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("User {} closed the {} socket", user_id, game_type);
                    break;
                }
                Err(e) => {
                    warn!("WebSocket error from user {}: {}", user_id, e);
                    break;
                }
                _ => {}
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                broadcast = events.recv() => match broadcast {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("User {} lagged {} {} events", user_id, skipped, game_type);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(event) = inbox.receiver.recv() => event,
                Some(event) = reply_rx.recv() => event,
            };

            let Some(message) = encode(&event) else { continue };
            if sender.send(message).await.is_err() {
                debug!("User {} disconnected from {}", user_id, game_type);
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut receive_task => send_task.abort(),
        _ = &mut send_task => receive_task.abort(),
    }

    state.hub.unregister(user_id, connection_id);
    state.metrics.connection_closed();
    info!("🔌 User {} left {}", user_id, game_type);
}

/// Apply one client frame; returns the reply owed to this connection, if any
async fn handle_command(orchestrator: &Orchestrator, user_id: UserId, text: &str) -> Option<RoundEvent> {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            return Some(RoundEvent::Error {
                message: format!("Invalid command: {}", e),
            })
        }
    };

    match command {
        ClientCommand::Join(request) => match orchestrator.join(user_id, request).await {
            // The broadcast `joined` event is the acknowledgement
            Ok(Admission::Accepted(_)) => None,
            Ok(Admission::Queued { position, .. }) => Some(RoundEvent::InQueue {
                user_id,
                position,
                message: "Round in progress, your bet is queued for the next round".to_string(),
            }),
            Err(rejection) => Some(RoundEvent::Error {
                message: rejection.to_string(),
            }),
        },
        ClientCommand::Cashout => match orchestrator.cashout(user_id).await {
            Ok(_) => None,
            Err(rejection) => Some(RoundEvent::Error {
                message: rejection.to_string(),
            }),
        },
    }
}

fn encode(event: &RoundEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            error!("Failed to serialize round event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::RouletteCategory;

    #[test]
    fn test_parse_join_commands() {
        let crash: ClientCommand =
            serde_json::from_str(r#"{"action":"join","bet_amount":10,"auto_cashout":1.5}"#).expect("crash join");
        assert_eq!(crash, ClientCommand::Join(JoinRequest::crash(10.0, Some(1.5))));

        let roulette: ClientCommand =
            serde_json::from_str(r#"{"action":"join","bet_amount":5,"type":"green"}"#).expect("roulette join");
        assert_eq!(
            roulette,
            ClientCommand::Join(JoinRequest::roulette(5.0, RouletteCategory::Green))
        );
    }

    #[test]
    fn test_parse_cashout_and_unknown() {
        let cashout: ClientCommand = serde_json::from_str(r#"{"action":"cashout"}"#).expect("cashout");
        assert_eq!(cashout, ClientCommand::Cashout);

        assert!(serde_json::from_str::<ClientCommand>(r#"{"action":"dance"}"#).is_err());
    }

    #[test]
    fn test_encode_uses_status_tag() {
        let message = encode(&RoundEvent::Countdown { seconds_remaining: 3 }).expect("encoded");
        match message {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).expect("json");
                assert_eq!(value["status"], "countdown");
                assert_eq!(value["seconds_remaining"], 3);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
