//! Room state and fan-out
//!
//! A room owns its users, board objects and cursors. Handlers get `&mut Room`
//! for the duration of one message and never keep it.

use std::collections::HashMap;
use std::sync::Arc;

use syncboard_shared::{BoardObject, CursorState, ObjectId, Role, UserId, UserSummary};

use super::connection::Connection;
use super::events::{RoomSnapshot, ServerMessage};

/// A member of a room
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub connection: Arc<Connection>,
    pub role: Role,
    pub name: String,
    pub color: String,
    pub joined_at: i64,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            role: self.role,
        }
    }
}

/// Isolated collaboration namespace
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub users: HashMap<UserId, User>,
    pub objects: HashMap<ObjectId, BoardObject>,
    pub cursors: HashMap<UserId, CursorState>,
    pub created_at: i64,
    pub last_activity: i64,
}

impl Room {
    pub fn new(id: impl Into<String>, now: i64) -> Self {
        Self {
            id: id.into(),
            users: HashMap::new(),
            objects: HashMap::new(),
            cursors: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self, now: i64) {
        self.last_activity = self.last_activity.max(now);
    }

    pub fn add_user(&mut self, user: User, now: i64) {
        self.users.insert(user.id.clone(), user);
        self.touch(now);
    }

    /// Remove a user and their cursor; objects they created stay
    pub fn remove_user(&mut self, user_id: &UserId) -> Option<User> {
        let user = self.users.remove(user_id)?;
        self.cursors.remove(user_id);
        Some(user)
    }

    pub fn role_of(&self, user_id: &UserId) -> Option<Role> {
        self.users.get(user_id).map(|u| u.role)
    }

    /// Everything a new member needs, minus the member's own entries
    pub fn snapshot_excluding(&self, user_id: &UserId) -> RoomSnapshot {
        let mut objects: Vec<BoardObject> = self.objects.values().cloned().collect();
        objects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut users: Vec<&User> = self.users.values().filter(|u| u.id != *user_id).collect();
        users.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

        let mut cursors: Vec<CursorState> = self
            .cursors
            .values()
            .filter(|c| c.user_id != *user_id)
            .cloned()
            .collect();
        cursors.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        RoomSnapshot {
            objects,
            users: users.into_iter().map(User::summary).collect(),
            cursors,
        }
    }

    /// Deliver a message to every writable member except `exclude`
    ///
    /// Fire-and-forget: failed sends are logged and skipped. Returns the
    /// number of members the message was queued for.
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<&UserId>) -> usize {
        let mut recipients = 0;
        let mut failed = 0;

        for user in self.users.values() {
            if exclude == Some(&user.id) || !user.connection.is_writable() {
                continue;
            }
            match user.connection.send(message.clone()) {
                Ok(()) => recipients += 1,
                Err(_) => {
                    failed += 1;
                    tracing::warn!(
                        room_id = %self.id,
                        user_id = %user.id,
                        session_id = %user.connection.session_id,
                        "Failed to send message to connection (likely closed)"
                    );
                }
            }
        }

        tracing::trace!(
            room_id = %self.id,
            message_type = message.kind(),
            recipients,
            failed,
            "Broadcast message to room"
        );

        recipients
    }

    /// Send to a single member. Returns false if absent or not writable.
    pub fn send_to(&self, user_id: &UserId, message: ServerMessage) -> bool {
        match self.users.get(user_id) {
            Some(user) if user.connection.is_writable() => user.connection.send(message).is_ok(),
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use syncboard_shared::{ObjectData, ObjectType};
    use tokio::sync::mpsc;

    pub(crate) fn test_user(
        id: &str,
        role: Role,
        joined_at: i64,
    ) -> (User, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let user = User {
            id: UserId::from(id),
            connection: Arc::new(Connection::new(tx)),
            role,
            name: format!("User {id}"),
            color: "#FF6B6B".to_string(),
            joined_at,
        };
        (user, rx)
    }

    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(out) = rx.try_recv() {
            if let Outbound::Message(message) = out {
                messages.push(message);
            }
        }
        messages
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let mut room = Room::new("r1", 1);
        let (alice, mut alice_rx) = test_user("user_1", Role::Editor, 1);
        let (bob, mut bob_rx) = test_user("user_2", Role::Viewer, 2);
        let (carol, mut carol_rx) = test_user("user_3", Role::Editor, 3);
        room.add_user(alice, 1);
        room.add_user(bob, 2);
        room.add_user(carol, 3);

        let message = ServerMessage::CursorMoved {
            user_id: UserId::from("user_1"),
            x: 1.0,
            y: 2.0,
        };
        let delivered = room.broadcast(&message, Some(&UserId::from("user_1")));

        assert_eq!(delivered, 2);
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![message.clone()]);
        assert_eq!(drain(&mut carol_rx), vec![message]);
    }

    #[test]
    fn test_broadcast_skips_closed_connections() {
        let mut room = Room::new("r1", 1);
        let (alice, alice_rx) = test_user("user_1", Role::Editor, 1);
        let (bob, mut bob_rx) = test_user("user_2", Role::Editor, 2);
        room.add_user(alice, 1);
        room.add_user(bob, 2);
        drop(alice_rx);

        let delivered = room.broadcast(
            &ServerMessage::UserLeft {
                user_id: UserId::from("user_9"),
            },
            None,
        );
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[test]
    fn test_remove_user_drops_cursor_but_keeps_objects() {
        let mut room = Room::new("r1", 1);
        let (alice, _rx) = test_user("user_1", Role::Editor, 1);
        room.add_user(alice, 1);
        room.cursors.insert(
            UserId::from("user_1"),
            CursorState {
                user_id: UserId::from("user_1"),
                x: 3.0,
                y: 4.0,
                timestamp: 5,
            },
        );
        room.objects.insert(
            ObjectId::from("obj_1"),
            BoardObject::new(
                ObjectId::from("obj_1"),
                ObjectType::Drawing,
                ObjectData::new(),
                UserId::from("user_1"),
                5,
            ),
        );

        assert!(room.remove_user(&UserId::from("user_1")).is_some());
        assert!(room.cursors.is_empty());
        assert_eq!(room.objects.len(), 1);

        // Idempotent
        assert!(room.remove_user(&UserId::from("user_1")).is_none());
    }

    #[test]
    fn test_snapshot_excludes_own_entries() {
        let mut room = Room::new("r1", 1);
        let (alice, _a) = test_user("user_1", Role::Editor, 1);
        let (bob, _b) = test_user("user_2", Role::Viewer, 2);
        room.add_user(alice, 1);
        room.add_user(bob, 2);
        for id in ["user_1", "user_2"] {
            room.cursors.insert(
                UserId::from(id),
                CursorState {
                    user_id: UserId::from(id),
                    x: 0.0,
                    y: 0.0,
                    timestamp: 3,
                },
            );
        }

        let snapshot = room.snapshot_excluding(&UserId::from("user_2"));
        assert_eq!(snapshot.users.len(), 1);
        assert_eq!(snapshot.users[0].id, UserId::from("user_1"));
        assert_eq!(snapshot.cursors.len(), 1);
        assert_eq!(snapshot.cursors[0].user_id, UserId::from("user_1"));
    }

    #[test]
    fn test_touch_never_regresses() {
        let mut room = Room::new("r1", 10);
        room.touch(5);
        assert_eq!(room.last_activity, 10);
        room.touch(20);
        assert_eq!(room.last_activity, 20);
    }
}
