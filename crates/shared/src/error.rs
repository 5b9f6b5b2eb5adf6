//! Error types for SyncBoard

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// A viewer attempted a mutating operation
    #[error("Viewers are not allowed to perform {action}")]
    Unauthorized { action: &'static str },

    #[error("Object not found: {object_id}")]
    ObjectNotFound { object_id: String },

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Inbound frame could not be parsed or carries an unknown type
    #[error("Invalid message: {0}")]
    Malformed(String),
}

impl BoardError {
    /// Whether the sender gets an `ERROR` frame for this failure.
    ///
    /// Missing objects are dropped silently while denials are reported.
    pub fn is_reported(&self) -> bool {
        matches!(self, BoardError::Unauthorized { .. } | BoardError::Malformed(_))
    }

    /// Operation name carried in the `ERROR` frame, if any
    pub fn action(&self) -> Option<&'static str> {
        match self {
            BoardError::Unauthorized { action } => Some(*action),
            _ => None,
        }
    }
}

pub type BoardResult<T> = Result<T, BoardError>;
