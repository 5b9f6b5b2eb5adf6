//! WebSocket connection handle
//!
//! The opaque handle the room store holds for each member. Frames are queued
//! on an unbounded channel and written by the connection's writer task.

use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerMessage;

/// Work item for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Liveness probe
    Ping,
    /// Send a close frame and stop writing
    Close,
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Channel to the writer task
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    /// Create a new connection
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            sender,
        }
    }

    /// Queue a message for this connection
    ///
    /// Returns Err if the writer has gone away
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed frame
    pub fn send(&self, message: ServerMessage) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.sender.send(Outbound::Message(message))
    }

    pub fn ping(&self) -> bool {
        self.sender.send(Outbound::Ping).is_ok()
    }

    pub fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }

    /// False once the writer half has been dropped
    pub fn is_writable(&self) -> bool {
        !self.sender.is_closed()
    }
}
