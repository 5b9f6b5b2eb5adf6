//! Global WebSocket state management
//!
//! Ties together the connection registry, the room store and the message
//! router. Cloned into every session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::Level;
use uuid::Uuid;

use crate::config::Config;

use super::connection::Connection;
use super::events::ServerMessage;
use super::resolver::ConflictResolver;
use super::router::MessageRouter;
use super::store::{RoomStore, StoreStats};

/// Global WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    /// All active connections indexed by session_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Canonical room state
    pub rooms: Arc<RoomStore>,

    pub router: MessageRouter,
}

impl WebSocketState {
    /// Create new WebSocket state
    pub fn new(config: &Config) -> Self {
        let rooms = Arc::new(RoomStore::new());
        let router = MessageRouter::new(
            Arc::clone(&rooms),
            ConflictResolver::new(config.move_jitter_max()),
            config.race_followup_delay(),
        );

        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms,
            router,
        }
    }

    /// Add a connection
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::debug!(
            session_id = %conn.session_id,
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(session_id).is_some() {
            tracing::debug!(
                session_id = %session_id,
                remaining_connections = connections.len(),
                "WebSocket connection removed"
            );
        }
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Tell every open connection the server is going away, then close it
    pub async fn announce_shutdown(&self) -> usize {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            let _ = conn.send(ServerMessage::ServerShutdown {
                message: "Server is shutting down".to_string(),
            });
            conn.close();
        }

        tracing::info!(
            connections = connections.len(),
            "Shutdown announced to open connections"
        );
        connections.len()
    }

    /// Resolves once every session has deregistered
    pub async fn wait_until_drained(&self) {
        let mut poll = tokio::time::interval(Duration::from_millis(50));
        loop {
            poll.tick().await;
            if self.connection_count().await == 0 {
                return;
            }
        }
    }

    /// Get statistics about the WebSocket state
    pub async fn get_stats(&self) -> WebSocketStats {
        let active_connections = self.connection_count().await;
        let active_rooms = self.rooms.room_count().await;

        WebSocketStats {
            active_connections,
            active_rooms,
        }
    }

    /// Log per-room statistics at `level` (debug or info)
    pub async fn log_stats(&self, level: Level) -> StoreStats {
        let connections = self.connection_count().await;
        let stats = self.rooms.stats().await;

        if level == Level::DEBUG {
            tracing::debug!(
                total_rooms = stats.total_rooms,
                active_connections = connections,
                "Server statistics"
            );
            for room in &stats.rooms {
                tracing::debug!(
                    room_id = %room.id,
                    users = room.users,
                    objects = room.objects,
                    cursors = room.cursors,
                    "Room statistics"
                );
            }
        } else {
            tracing::info!(
                total_rooms = stats.total_rooms,
                active_connections = connections,
                "Server statistics"
            );
            for room in &stats.rooms {
                tracing::info!(
                    room_id = %room.id,
                    users = room.users,
                    objects = room.objects,
                    cursors = room.cursors,
                    "Room statistics"
                );
            }
        }

        stats
    }

    /// Periodically log statistics while any connection is open
    pub fn spawn_stats_reporter(&self, every: Duration) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                ticker.tick().await;
                if state.connection_count().await > 0 {
                    state.log_stats(Level::INFO).await;
                }
            }
        })
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone)]
pub struct WebSocketStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of rooms ever created
    pub active_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_add_and_remove_connection() {
        let state = WebSocketState::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn = state.add_connection(Connection::new(tx)).await;
        assert_eq!(state.connection_count().await, 1);

        state.remove_connection(&conn.session_id).await;
        assert_eq!(state.connection_count().await, 0);

        // Removing twice is harmless
        state.remove_connection(&conn.session_id).await;
        assert_eq!(state.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_announce_shutdown_sends_notice_then_close() {
        let state = WebSocketState::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.add_connection(Connection::new(tx)).await;

        assert_eq!(state.announce_shutdown().await, 1);

        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Message(ServerMessage::ServerShutdown { .. }))
        ));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_wait_until_drained() {
        let state = WebSocketState::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = state.add_connection(Connection::new(tx)).await;

        let pending = tokio::time::timeout(Duration::from_millis(120), state.wait_until_drained());
        assert!(pending.await.is_err());

        state.remove_connection(&conn.session_id).await;
        let drained = tokio::time::timeout(Duration::from_millis(500), state.wait_until_drained());
        assert!(drained.await.is_ok());
    }

    #[tokio::test]
    async fn test_stats() {
        let state = WebSocketState::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        state.add_connection(Connection::new(tx)).await;
        state.rooms.get_or_create_room("r1").await;

        let stats = state.get_stats().await;
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.active_rooms, 1);
    }

    #[tokio::test]
    async fn test_log_stats_reflects_membership() {
        let state = WebSocketState::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = state.add_connection(Connection::new(tx)).await;

        let user_id = state
            .rooms
            .add_user("r1", Arc::clone(&conn), Default::default())
            .await;
        let stats = state.log_stats(Level::DEBUG).await;
        assert_eq!(stats.total_rooms, 1);
        assert_eq!(stats.rooms[0].users, 1);

        state.rooms.remove_user("r1", &user_id).await;
        let stats = state.log_stats(Level::DEBUG).await;
        assert_eq!(stats.total_rooms, 1);
        assert_eq!(stats.rooms[0].users, 0);
    }
}
