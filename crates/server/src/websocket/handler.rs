//! WebSocket handler for Axum
//!
//! Upgrades the connection, joins the requested room and runs the session
//! until the peer goes away or misses too many heartbeats.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use std::sync::Arc;
use std::time::Duration;
use syncboard_shared::{now_millis, Role, UserId};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::Level;

use crate::state::AppState;

use super::{
    connection::{Connection, Outbound},
    events::ServerMessage,
    store::{JoinOptions, DEFAULT_ROOM_ID},
};

const WELCOME_MESSAGE: &str = "Connected to SyncBoard WebSocket server";

/// Join parameters from the upgrade URL
#[derive(Debug, Default)]
pub struct JoinParams {
    pub room_id: Option<String>,
    pub user_name: Option<String>,
    pub user_role: Option<String>,
    pub user_color: Option<String>,
}

impl JoinParams {
    /// Build from raw query pairs; a repeated key keeps its first value
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "roomId" => &mut params.room_id,
                "userName" => &mut params.user_name,
                "userRole" => &mut params.user_role,
                "userColor" => &mut params.user_color,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        params
    }

    pub fn room_id(&self) -> &str {
        match self.room_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => DEFAULT_ROOM_ID,
        }
    }

    pub fn options(&self) -> JoinOptions {
        JoinOptions {
            name: self.user_name.clone(),
            role: Role::from_param(self.user_role.as_deref()),
            color: self.user_color.clone(),
        }
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let params = JoinParams::from_pairs(pairs);
    tracing::debug!(room_id = %params.room_id(), "WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, params, app_state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: JoinParams, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending frames to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let ws_state = app_state.ws_state.clone();
    let conn = ws_state.add_connection(Connection::new(tx)).await;
    let session_id = conn.session_id;

    // Spawn task to send frames to client
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let frame = match outbound {
                Outbound::Message(message) => match serde_json::to_string(&message) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::error!(error = ?e, "Failed to serialize WebSocket message");
                        continue;
                    }
                },
                Outbound::Ping => Message::Ping(Vec::new()),
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if sender.send(frame).await.is_err() {
                break; // Connection closed
            }
        }
    });

    let room_id = params.room_id().to_string();
    let user_id = ws_state
        .rooms
        .add_user_with(&room_id, Arc::clone(&conn), params.options(), |room, user_id| {
            let snapshot = room.snapshot_excluding(user_id);
            room.send_to(
                user_id,
                ServerMessage::InitialState {
                    user_id: user_id.clone(),
                    data: snapshot,
                },
            );
            room.send_to(
                user_id,
                ServerMessage::Welcome {
                    user_id: user_id.clone(),
                    room_id: room.id.clone(),
                    server_time: now_millis(),
                    message: WELCOME_MESSAGE.to_string(),
                },
            );
            if let Some(user) = room.users.get(user_id) {
                room.broadcast(
                    &ServerMessage::UserJoined {
                        user_id: user_id.clone(),
                        user: user.summary(),
                    },
                    Some(user_id),
                );
            }
        })
        .await;

    tracing::info!(
        session_id = %session_id,
        room_id = %room_id,
        user_id = %user_id,
        "WebSocket session started"
    );
    ws_state.log_stats(Level::DEBUG).await;

    let config = &app_state.config;
    let period = config.heartbeat_interval();
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if missed >= config.heartbeat_max_missed {
                    tracing::warn!(
                        session_id = %session_id,
                        user_id = %user_id,
                        missed,
                        "Heartbeat missed; terminating connection"
                    );
                    break;
                }
                missed += 1;
                if !conn.ping() {
                    break;
                }
            }
            frame = receiver.next() => {
                let Some(frame) = frame else { break };
                let msg = match frame {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = ?e, "WebSocket read error");
                        break;
                    }
                };
                missed = 0;

                match msg {
                    Message::Text(text) => {
                        ws_state.router.dispatch_text(&room_id, &user_id, &text).await;
                    }
                    Message::Close(_) => {
                        tracing::debug!(session_id = %session_id, "WebSocket close frame received");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        // Axum answers pings itself
                    }
                    Message::Binary(_) => {}
                }
            }
        }
    }

    cleanup(&app_state, &room_id, &user_id, session_id).await;

    // Writer stops once the last handle is gone; give queued frames a moment to flush
    drop(conn);
    if tokio::time::timeout(Duration::from_millis(250), &mut send_task).await.is_err() {
        tracing::debug!(session_id = %session_id, "Writer did not finish in time");
        send_task.abort();
    }
}

/// Cleanup on disconnect
async fn cleanup(app_state: &AppState, room_id: &str, user_id: &UserId, session_id: uuid::Uuid) {
    let ws_state = &app_state.ws_state;

    if ws_state.rooms.remove_user(room_id, user_id).await.is_some() {
        ws_state
            .rooms
            .broadcast(
                room_id,
                &ServerMessage::UserLeft {
                    user_id: user_id.clone(),
                },
                None,
            )
            .await;
    }

    ws_state.remove_connection(&session_id).await;
    tracing::info!(
        session_id = %session_id,
        room_id = %room_id,
        user_id = %user_id,
        "WebSocket connection closed"
    );
    ws_state.log_stats(Level::DEBUG).await;
}
