//! Room table
//!
//! Owns every room and its canonical state. All mutation goes through the
//! write lock with a synchronous closure, so handlers run to completion
//! without interleaving and cannot hold a room across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use syncboard_shared::{now_millis, random_color, Role, UserId};
use tokio::sync::RwLock;

use super::connection::Connection;
use super::events::{RoomSnapshot, ServerMessage};
use super::room::{Room, User};

/// Room used when a client doesn't ask for one
pub const DEFAULT_ROOM_ID: &str = "default-room";

/// Optional profile supplied at join time
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    pub name: Option<String>,
    pub role: Role,
    pub color: Option<String>,
}

/// Process-scoped table of rooms
///
/// Rooms are never evicted, even once empty.
pub struct RoomStore {
    rooms: RwLock<HashMap<String, Room>>,
    next_user_id: AtomicU64,
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_user_id: AtomicU64::new(1),
        }
    }

    /// Ensure a room exists. Returns true if this call created it.
    pub async fn get_or_create_room(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        ensure_room(&mut rooms, room_id).1
    }

    /// Run `f` against an existing room under the write lock
    pub async fn with_room<R>(&self, room_id: &str, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
        let mut rooms = self.rooms.write().await;
        rooms.get_mut(room_id).map(f)
    }

    /// Run `f` against a room, creating it first if needed
    pub async fn with_room_or_create<R>(&self, room_id: &str, f: impl FnOnce(&mut Room) -> R) -> R {
        let mut rooms = self.rooms.write().await;
        let (room, _) = ensure_room(&mut rooms, room_id);
        f(room)
    }

    /// Allocate the next process-unique user id
    pub fn next_user_id(&self) -> UserId {
        UserId::from_sequence(self.next_user_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Build a user from join options, filling in defaults
    pub fn new_user(&self, connection: Arc<Connection>, options: JoinOptions) -> User {
        let id = self.next_user_id();
        let name = options
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("User {id}"));
        let color = options
            .color
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(random_color);

        User {
            id,
            connection,
            role: options.role,
            name,
            color,
            joined_at: now_millis(),
        }
    }

    /// Register a new member, creating the room if needed
    pub async fn add_user(
        &self,
        room_id: &str,
        connection: Arc<Connection>,
        options: JoinOptions,
    ) -> UserId {
        self.add_user_with(room_id, connection, options, |_, _| {}).await
    }

    /// Register a new member and run `on_join` in the same critical section,
    /// so nothing can reach the room between the insert and `on_join`
    pub async fn add_user_with(
        &self,
        room_id: &str,
        connection: Arc<Connection>,
        options: JoinOptions,
        on_join: impl FnOnce(&mut Room, &UserId),
    ) -> UserId {
        let user = self.new_user(connection, options);
        let user_id = user.id.clone();
        let role = user.role;

        self.with_room_or_create(room_id, |room| {
            room.add_user(user, now_millis());
            on_join(room, &user_id);
        })
        .await;

        tracing::info!(
            room_id = %room_id,
            user_id = %user_id,
            role = role.as_str(),
            "User joined room"
        );

        user_id
    }

    /// Remove a member and their cursor. No-op if already gone.
    pub async fn remove_user(&self, room_id: &str, user_id: &UserId) -> Option<User> {
        let removed = self
            .with_room(room_id, |room| {
                let removed = room.remove_user(user_id);
                if removed.is_some() && room.users.is_empty() {
                    tracing::debug!(room_id = %room.id, "Room is empty; keeping state in memory");
                }
                removed
            })
            .await
            .flatten();

        if removed.is_some() {
            tracing::info!(room_id = %room_id, user_id = %user_id, "User left room");
        }
        removed
    }

    /// Current objects plus every other member and cursor
    pub async fn snapshot_excluding(&self, room_id: &str, user_id: &UserId) -> Option<RoomSnapshot> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|room| room.snapshot_excluding(user_id))
    }

    pub async fn broadcast(
        &self,
        room_id: &str,
        message: &ServerMessage,
        exclude: Option<&UserId>,
    ) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(room) => room.broadcast(message, exclude),
            None => {
                tracing::warn!(room_id = %room_id, "No room found for broadcast");
                0
            }
        }
    }

    /// Get total number of rooms
    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }

    pub async fn stats(&self) -> StoreStats {
        let rooms = self.rooms.read().await;
        let mut room_stats: Vec<RoomStats> = rooms
            .values()
            .map(|room| RoomStats {
                id: room.id.clone(),
                users: room.users.len(),
                objects: room.objects.len(),
                cursors: room.cursors.len(),
                created_at: room.created_at,
                last_activity: room.last_activity,
            })
            .collect();
        room_stats.sort_by(|a, b| a.id.cmp(&b.id));

        StoreStats {
            total_rooms: room_stats.len(),
            rooms: room_stats,
        }
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_room<'a>(rooms: &'a mut HashMap<String, Room>, room_id: &str) -> (&'a mut Room, bool) {
    let created = !rooms.contains_key(room_id);
    if created {
        tracing::info!(room_id = %room_id, "Room created");
    }
    let room = rooms
        .entry(room_id.to_string())
        .or_insert_with(|| Room::new(room_id, now_millis()));
    (room, created)
}

/// Statistics about the room table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_rooms: usize,
    pub rooms: Vec<RoomStats>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub id: String,
    pub users: usize,
    pub objects: usize,
    pub cursors: usize,
    pub created_at: i64,
    pub last_activity: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use syncboard_shared::{BoardObject, CursorState, ObjectData, ObjectId, ObjectType, COLOR_PALETTE};
    use tokio::sync::mpsc;

    fn connection() -> (Arc<Connection>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Connection::new(tx)), rx)
    }

    #[tokio::test]
    async fn test_get_or_create_room_is_idempotent() {
        let store = RoomStore::new();
        assert!(store.get_or_create_room("r1").await);
        assert!(!store.get_or_create_room("r1").await);
        assert_eq!(store.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_add_user_defaults() {
        let store = RoomStore::new();
        let (conn, _rx) = connection();

        let user_id = store.add_user("r1", conn, JoinOptions::default()).await;

        let user = store
            .with_room("r1", |room| room.users.get(&user_id).cloned())
            .await
            .flatten()
            .unwrap();
        assert_eq!(user.role, Role::Editor);
        assert_eq!(user.name, format!("User {user_id}"));
        assert!(COLOR_PALETTE.contains(&user.color.as_str()));
    }

    #[tokio::test]
    async fn test_user_ids_are_unique_across_rooms() {
        let store = RoomStore::new();
        let (c1, _r1) = connection();
        let (c2, _r2) = connection();

        let a = store.add_user("r1", c1, JoinOptions::default()).await;
        let b = store.add_user("r2", c2, JoinOptions::default()).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_remove_user_is_idempotent_and_keeps_room() {
        let store = RoomStore::new();
        let (conn, _rx) = connection();
        let user_id = store
            .add_user(
                "r1",
                conn,
                JoinOptions {
                    name: Some("Ana".into()),
                    role: Role::Viewer,
                    color: Some("#123456".into()),
                },
            )
            .await;

        assert!(store.remove_user("r1", &user_id).await.is_some());
        assert!(store.remove_user("r1", &user_id).await.is_none());
        assert!(store.remove_user("missing", &user_id).await.is_none());

        let stats = store.stats().await;
        assert_eq!(stats.total_rooms, 1);
        assert_eq!(stats.rooms[0].users, 0);
    }

    #[tokio::test]
    async fn test_snapshot_excluding_joiner() {
        let store = RoomStore::new();
        let (c1, _r1) = connection();
        let (c2, _r2) = connection();
        let existing = store.add_user("r1", c1, JoinOptions::default()).await;

        store
            .with_room("r1", |room| {
                room.objects.insert(
                    ObjectId::from("obj_1"),
                    BoardObject::new(
                        ObjectId::from("obj_1"),
                        ObjectType::StickyNote,
                        ObjectData::new(),
                        existing.clone(),
                        1,
                    ),
                );
                room.cursors.insert(
                    existing.clone(),
                    CursorState {
                        user_id: existing.clone(),
                        x: 1.0,
                        y: 1.0,
                        timestamp: 1,
                    },
                );
            })
            .await;

        let joiner = store.add_user("r1", c2, JoinOptions::default()).await;
        let snapshot = store.snapshot_excluding("r1", &joiner).await.unwrap();

        assert_eq!(snapshot.objects.len(), 1);
        assert_eq!(snapshot.users.len(), 1);
        assert_eq!(snapshot.users[0].id, existing);
        assert_eq!(snapshot.cursors.len(), 1);
        assert!(snapshot.users.iter().all(|u| u.id != joiner));
    }

    #[tokio::test]
    async fn test_empty_name_and_color_fall_back() {
        let store = RoomStore::new();
        let (conn, _rx) = connection();
        let user = store.new_user(
            conn,
            JoinOptions {
                name: Some("  ".into()),
                role: Role::Editor,
                color: Some(String::new()),
            },
        );
        assert!(user.name.starts_with("User user_"));
        assert!(COLOR_PALETTE.contains(&user.color.as_str()));
    }
}
