//! Message dispatch
//!
//! Classifies inbound messages, enforces role-based authorization, applies the
//! matching room mutation and decides what to broadcast. Handlers run
//! synchronously under the room store's write lock; anything that must happen
//! later (deferred moves, the race diagnostic's follow-up moves) is returned as
//! [`Deferred`] work and scheduled once the lock is released.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use syncboard_shared::{
    now_millis, BoardError, BoardObject, BoardResult, CursorState, ObjectData, ObjectId,
    ObjectType, UserId,
};

use super::events::{ClientMessage, ServerMessage};
use super::resolver::{ConflictResolver, PendingMove};
use super::room::Room;
use super::store::RoomStore;

/// Object used by TRIGGER_RACE_CONDITION when the client names none
pub const RACE_TEST_OBJECT_ID: &str = "race-test-object";

/// Work produced by a handler that runs after the current message
#[derive(Debug, Clone, PartialEq)]
pub enum Deferred {
    /// Hand a move to the conflict resolver
    ApplyMove(PendingMove),
    /// Feed a message back through the router after a delay
    Redispatch {
        after: Duration,
        message: ClientMessage,
    },
}

/// Per-message inputs that don't come from the room
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext {
    /// Arrival time of the message
    pub now: i64,
    /// Gap between the two moves of the race diagnostic
    pub race_followup_delay: Duration,
}

#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<RoomStore>,
    resolver: ConflictResolver,
    race_followup_delay: Duration,
}

impl MessageRouter {
    pub fn new(
        store: Arc<RoomStore>,
        resolver: ConflictResolver,
        race_followup_delay: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            race_followup_delay,
        }
    }

    /// Parse and dispatch a raw text frame
    ///
    /// Frames that fail to parse get an `ERROR` reply on the sender's
    /// connection; the connection stays open.
    pub async fn dispatch_text(&self, room_id: &str, user_id: &UserId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.dispatch(room_id, user_id, message).await,
            Err(err) => {
                tracing::warn!(
                    room_id = %room_id,
                    user_id = %user_id,
                    error = %err,
                    "Failed to parse client message"
                );
                self.store
                    .with_room(room_id, |room| room.send_to(user_id, ServerMessage::error(&err)))
                    .await;
            }
        }
    }

    /// Handle one message from `user_id` in `room_id`
    pub async fn dispatch(&self, room_id: &str, user_id: &UserId, message: ClientMessage) {
        let kind = message.kind();
        let ctx = DispatchContext {
            now: now_millis(),
            race_followup_delay: self.race_followup_delay,
        };

        let result = self
            .store
            .with_room(room_id, |room| {
                let result = handle_message(room, user_id, message, &ctx);
                if let Err(err) = &result {
                    if err.is_reported() {
                        room.send_to(user_id, ServerMessage::error(err));
                    }
                }
                result
            })
            .await
            .unwrap_or_else(|| Err(BoardError::RoomNotFound(room_id.to_string())));

        match result {
            Ok(deferred) => self.schedule(room_id, user_id, deferred),
            Err(BoardError::Unauthorized { action }) => {
                tracing::info!(
                    room_id = %room_id,
                    user_id = %user_id,
                    action,
                    "Blocked mutating message from viewer"
                );
            }
            Err(err) => {
                tracing::debug!(
                    room_id = %room_id,
                    user_id = %user_id,
                    message_type = kind,
                    error = %err,
                    "Message dropped"
                );
            }
        }
    }

    fn schedule(&self, room_id: &str, user_id: &UserId, deferred: Vec<Deferred>) {
        for work in deferred {
            match work {
                Deferred::ApplyMove(pending) => {
                    self.resolver.schedule(Arc::clone(&self.store), pending);
                }
                Deferred::Redispatch { after, message } => {
                    let router = self.clone();
                    let room_id = room_id.to_string();
                    let user_id = user_id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        router.dispatch(&room_id, &user_id, message).await;
                    });
                }
            }
        }
    }
}

/// Apply one message to `room` on behalf of `sender`
///
/// Returns the deferred work to schedule. Authorization failures are returned
/// as [`BoardError::Unauthorized`] with no state change.
pub fn handle_message(
    room: &mut Room,
    sender: &UserId,
    message: ClientMessage,
    ctx: &DispatchContext,
) -> BoardResult<Vec<Deferred>> {
    room.touch(ctx.now);

    let role = room
        .role_of(sender)
        .ok_or_else(|| BoardError::UserNotFound(sender.to_string()))?;

    if message.is_mutating() && !role.can_edit() {
        return Err(BoardError::Unauthorized {
            action: message.kind(),
        });
    }

    if matches!(message, ClientMessage::CursorMove { .. }) {
        tracing::trace!(room_id = %room.id, user_id = %sender, "Handling CURSOR_MOVE");
    } else {
        tracing::debug!(
            room_id = %room.id,
            user_id = %sender,
            message_type = message.kind(),
            "Handling message"
        );
    }

    match message {
        ClientMessage::CreateObject {
            object_id,
            object_type,
            data,
        } => {
            create_object(room, sender, object_id, object_type, data, ctx.now);
            Ok(Vec::new())
        }
        ClientMessage::UpdateObject { object_id, data } => {
            update_object(room, sender, object_id, data, ctx.now)?;
            Ok(Vec::new())
        }
        ClientMessage::DeleteObject { object_id } => {
            delete_object(room, sender, object_id)?;
            Ok(Vec::new())
        }
        ClientMessage::MoveObject { object_id, x, y } => {
            let pending = move_object(room, sender, object_id, x, y, ctx.now)?;
            Ok(vec![Deferred::ApplyMove(pending)])
        }
        ClientMessage::CursorMove { x, y } => {
            cursor_move(room, sender, x, y, ctx.now);
            Ok(Vec::new())
        }
        ClientMessage::TriggerRaceCondition { object_id } => {
            Ok(trigger_race_condition(room, sender, object_id, ctx))
        }
    }
}

fn create_object(
    room: &mut Room,
    sender: &UserId,
    object_id: Option<ObjectId>,
    object_type: ObjectType,
    data: ObjectData,
    now: i64,
) {
    let object_id = object_id.unwrap_or_else(|| ObjectId::generate_at(now));
    let object = BoardObject::new(object_id.clone(), object_type, data, sender.clone(), now);
    room.objects.insert(object_id.clone(), object.clone());

    tracing::info!(room_id = %room.id, object_id = %object_id, user_id = %sender, "Object created");

    room.broadcast(&ServerMessage::ObjectCreated { object_id, object }, None);
}

fn update_object(
    room: &mut Room,
    sender: &UserId,
    object_id: ObjectId,
    delta: ObjectData,
    now: i64,
) -> BoardResult<()> {
    let object = room
        .objects
        .get_mut(&object_id)
        .ok_or_else(|| BoardError::ObjectNotFound {
            object_id: object_id.to_string(),
        })?;

    object.merge_data(&delta);
    object.last_modified = object.last_modified.max(now);
    object.last_modified_by = sender.clone();
    let last_modified = object.last_modified;

    room.broadcast(
        &ServerMessage::ObjectUpdated {
            object_id,
            data: delta,
            last_modified,
            last_modified_by: sender.clone(),
        },
        None,
    );
    Ok(())
}

fn delete_object(room: &mut Room, sender: &UserId, object_id: ObjectId) -> BoardResult<()> {
    if room.objects.remove(&object_id).is_none() {
        return Err(BoardError::ObjectNotFound {
            object_id: object_id.to_string(),
        });
    }

    tracing::info!(room_id = %room.id, object_id = %object_id, user_id = %sender, "Object deleted");

    room.broadcast(
        &ServerMessage::ObjectDeleted {
            object_id,
            deleted_by: sender.clone(),
        },
        None,
    );
    Ok(())
}

/// Capture the arrival time; the write itself is deferred
fn move_object(
    room: &Room,
    sender: &UserId,
    object_id: ObjectId,
    x: f64,
    y: f64,
    now: i64,
) -> BoardResult<PendingMove> {
    if !room.objects.contains_key(&object_id) {
        return Err(BoardError::ObjectNotFound {
            object_id: object_id.to_string(),
        });
    }

    Ok(PendingMove {
        room_id: room.id.clone(),
        object_id,
        x,
        y,
        arrived_at: now,
        moved_by: sender.clone(),
    })
}

fn cursor_move(room: &mut Room, sender: &UserId, x: f64, y: f64, now: i64) {
    room.cursors.insert(
        sender.clone(),
        CursorState {
            user_id: sender.clone(),
            x,
            y,
            timestamp: now,
        },
    );

    room.broadcast(
        &ServerMessage::CursorMoved {
            user_id: sender.clone(),
            x,
            y,
        },
        Some(sender),
    );
}

fn trigger_race_condition(
    room: &mut Room,
    sender: &UserId,
    object_id: Option<ObjectId>,
    ctx: &DispatchContext,
) -> Vec<Deferred> {
    let object_id = object_id.unwrap_or_else(|| ObjectId::from(RACE_TEST_OBJECT_ID));

    tracing::info!(room_id = %room.id, object_id = %object_id, user_id = %sender, "Race condition test started");

    if !room.objects.contains_key(&object_id) {
        let data = json!({
            "x": 100,
            "y": 100,
            "text": "Race Test",
            "width": 200,
            "height": 100,
            "color": "#ffeb3b",
        });
        let object = BoardObject::new(
            object_id.clone(),
            ObjectType::StickyNote,
            data.as_object().cloned().unwrap_or_default(),
            sender.clone(),
            ctx.now,
        );
        room.objects.insert(object_id.clone(), object.clone());
        room.broadcast(
            &ServerMessage::ObjectCreated {
                object_id: object_id.clone(),
                object,
            },
            None,
        );
    }

    vec![
        Deferred::Redispatch {
            after: Duration::ZERO,
            message: ClientMessage::MoveObject {
                object_id: object_id.clone(),
                x: 200.0,
                y: 200.0,
            },
        },
        Deferred::Redispatch {
            after: ctx.race_followup_delay,
            message: ClientMessage::MoveObject {
                object_id,
                x: 400.0,
                y: 400.0,
            },
        },
    ]
}
