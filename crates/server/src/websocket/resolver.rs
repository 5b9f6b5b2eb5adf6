//! Last-write-wins resolution for MOVE_OBJECT
//!
//! A move is not applied when it arrives. Its arrival time is captured and the
//! write is deferred by a random delay, so concurrent moves on one object can
//! execute out of order. When the deferred write runs it compares its arrival
//! time against the object's *current* `last_modified`; a move older than the
//! committed state is discarded. The move with the later arrival time therefore
//! wins regardless of which deferred write executes first.
//!
//! Two moves with the same arrival time are not ordered: whichever runs last
//! wins.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use syncboard_shared::{ObjectId, UserId};
use tokio::task::JoinHandle;

use super::events::ServerMessage;
use super::room::Room;
use super::store::RoomStore;

/// A move waiting for its deferred write
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMove {
    pub room_id: String,
    pub object_id: ObjectId,
    pub x: f64,
    pub y: f64,
    /// When the router received the request; the ordering key
    pub arrived_at: i64,
    pub moved_by: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOutcome {
    /// Written and broadcast as OBJECT_MOVED
    Committed,
    /// A write newer than this move was already committed
    Stale { committed: i64 },
    /// The object was deleted while the move was pending
    Vanished,
}

/// Schedules deferred moves with bounded random jitter
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    max_jitter: Duration,
}

impl ConflictResolver {
    pub fn new(max_jitter: Duration) -> Self {
        Self { max_jitter }
    }

    /// Random delay in `[0, max_jitter]`
    pub fn jitter(&self) -> Duration {
        let max_micros = self.max_jitter.as_micros() as u64;
        if max_micros == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::thread_rng().gen_range(0..=max_micros))
    }

    /// Defer `pending` by a random jitter
    pub fn schedule(
        &self,
        store: Arc<RoomStore>,
        pending: PendingMove,
    ) -> JoinHandle<Option<MoveOutcome>> {
        self.schedule_after(store, pending, self.jitter())
    }

    /// Defer `pending` by exactly `delay`
    ///
    /// The task owns the move, so it is applied at most once; it re-reads
    /// the room when it wakes rather than trusting scheduling-time state.
    pub fn schedule_after(
        &self,
        store: Arc<RoomStore>,
        pending: PendingMove,
        delay: Duration,
    ) -> JoinHandle<Option<MoveOutcome>> {
        tracing::trace!(
            room_id = %pending.room_id,
            object_id = %pending.object_id,
            arrived_at = pending.arrived_at,
            delay_us = delay.as_micros() as u64,
            "Scheduled move"
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let room_id = pending.room_id.clone();
            let outcome = store
                .with_room(&room_id, |room| resolve_move(room, pending))
                .await;
            if outcome.is_none() {
                tracing::debug!(room_id = %room_id, "Room vanished before move was applied");
            }
            outcome
        })
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

/// Apply a deferred move against the room's current state
pub fn resolve_move(room: &mut Room, pending: PendingMove) -> MoveOutcome {
    let Some(object) = room.objects.get_mut(&pending.object_id) else {
        tracing::debug!(
            room_id = %room.id,
            object_id = %pending.object_id,
            "Move discarded: object deleted while pending"
        );
        return MoveOutcome::Vanished;
    };

    if object.last_modified > pending.arrived_at {
        tracing::info!(
            room_id = %room.id,
            object_id = %pending.object_id,
            arrived_at = pending.arrived_at,
            committed = object.last_modified,
            "Conflict detected: stale move discarded"
        );
        return MoveOutcome::Stale {
            committed: object.last_modified,
        };
    }

    object.set_position(pending.x, pending.y);
    object.last_modified = pending.arrived_at;
    object.last_modified_by = pending.moved_by.clone();

    tracing::debug!(
        room_id = %room.id,
        object_id = %pending.object_id,
        x = pending.x,
        y = pending.y,
        user_id = %pending.moved_by,
        "Object moved"
    );

    room.broadcast(
        &ServerMessage::ObjectMoved {
            object_id: pending.object_id,
            x: pending.x,
            y: pending.y,
            last_modified: pending.arrived_at,
            last_modified_by: pending.moved_by,
        },
        None,
    );

    MoveOutcome::Committed
}
