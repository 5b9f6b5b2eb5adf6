//! WebSocket message types and serialization
//!
//! Defines every client-to-server and server-to-client frame. Both directions
//! are JSON objects discriminated by a `type` field; unknown types fail to
//! parse rather than falling through to a default arm.

use serde::{Deserialize, Serialize};
use syncboard_shared::{
    BoardError, BoardObject, CursorState, ObjectData, ObjectId, ObjectType, UserId, UserSummary,
};

// =============================================================================
// Client-to-Server Messages
// =============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Create a board object; the server generates an id when none is given
    #[serde(rename_all = "camelCase")]
    CreateObject {
        #[serde(default)]
        object_id: Option<ObjectId>,
        object_type: ObjectType,
        data: ObjectData,
    },

    /// Shallow-merge `data` into an existing object
    #[serde(rename_all = "camelCase")]
    UpdateObject { object_id: ObjectId, data: ObjectData },

    #[serde(rename_all = "camelCase")]
    DeleteObject { object_id: ObjectId },

    /// Reposition an object; goes through the conflict resolver
    #[serde(rename_all = "camelCase")]
    MoveObject { object_id: ObjectId, x: f64, y: f64 },

    /// Presence update, allowed for every role
    CursorMove { x: f64, y: f64 },

    /// Diagnostic: fire two conflicting moves at a shared test object
    #[serde(rename_all = "camelCase")]
    TriggerRaceCondition {
        #[serde(default)]
        object_id: Option<ObjectId>,
    },
}

impl ClientMessage {
    /// Wire name of the message kind, also used as the denied action
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateObject { .. } => "CREATE_OBJECT",
            ClientMessage::UpdateObject { .. } => "UPDATE_OBJECT",
            ClientMessage::DeleteObject { .. } => "DELETE_OBJECT",
            ClientMessage::MoveObject { .. } => "MOVE_OBJECT",
            ClientMessage::CursorMove { .. } => "CURSOR_MOVE",
            ClientMessage::TriggerRaceCondition { .. } => "TRIGGER_RACE_CONDITION",
        }
    }

    /// Whether the message changes board content (and so needs an editor)
    pub fn is_mutating(&self) -> bool {
        !matches!(self, ClientMessage::CursorMove { .. })
    }

    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, BoardError> {
        serde_json::from_str(text).map_err(|e| BoardError::Malformed(e.to_string()))
    }
}

// =============================================================================
// Server-to-Client Messages
// =============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Connection acknowledged
    #[serde(rename_all = "camelCase")]
    Welcome {
        user_id: UserId,
        room_id: String,
        server_time: i64,
        message: String,
    },

    /// Board state seeded to a newly joined member
    #[serde(rename_all = "camelCase")]
    InitialState { user_id: UserId, data: RoomSnapshot },

    #[serde(rename_all = "camelCase")]
    UserJoined { user_id: UserId, user: UserSummary },

    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: UserId },

    #[serde(rename_all = "camelCase")]
    ObjectCreated {
        object_id: ObjectId,
        object: BoardObject,
    },

    /// Carries only the merged delta, not the full payload
    #[serde(rename_all = "camelCase")]
    ObjectUpdated {
        object_id: ObjectId,
        data: ObjectData,
        last_modified: i64,
        last_modified_by: UserId,
    },

    #[serde(rename_all = "camelCase")]
    ObjectDeleted {
        object_id: ObjectId,
        deleted_by: UserId,
    },

    #[serde(rename_all = "camelCase")]
    ObjectMoved {
        object_id: ObjectId,
        x: f64,
        y: f64,
        last_modified: i64,
        last_modified_by: UserId,
    },

    #[serde(rename_all = "camelCase")]
    CursorMoved { user_id: UserId, x: f64, y: f64 },

    /// Error message, sent to the offending client only
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },

    ServerShutdown { message: String },
}

impl ServerMessage {
    pub fn error(err: &BoardError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
            action: err.action().map(str::to_string),
        }
    }

    /// Wire name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "WELCOME",
            ServerMessage::InitialState { .. } => "INITIAL_STATE",
            ServerMessage::UserJoined { .. } => "USER_JOINED",
            ServerMessage::UserLeft { .. } => "USER_LEFT",
            ServerMessage::ObjectCreated { .. } => "OBJECT_CREATED",
            ServerMessage::ObjectUpdated { .. } => "OBJECT_UPDATED",
            ServerMessage::ObjectDeleted { .. } => "OBJECT_DELETED",
            ServerMessage::ObjectMoved { .. } => "OBJECT_MOVED",
            ServerMessage::CursorMoved { .. } => "CURSOR_MOVED",
            ServerMessage::Error { .. } => "ERROR",
            ServerMessage::ServerShutdown { .. } => "SERVER_SHUTDOWN",
        }
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Room contents as seen by one member
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub objects: Vec<BoardObject>,
    pub users: Vec<UserSummary>,
    pub cursors: Vec<CursorState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_object_deserialization() {
        let json = r#"{"type":"CREATE_OBJECT","objectType":"STICKY_NOTE","data":{"x":0,"y":0,"text":"hi"}}"#;
        let message = ClientMessage::parse(json).unwrap();
        match message {
            ClientMessage::CreateObject {
                object_id,
                object_type,
                data,
            } => {
                assert_eq!(object_id, None);
                assert_eq!(object_type, ObjectType::StickyNote);
                assert_eq!(data["text"], "hi");
            }
            _ => panic!("Expected CreateObject message"),
        }
    }

    #[test]
    fn test_move_and_race_deserialization() {
        let message =
            ClientMessage::parse(r#"{"type":"MOVE_OBJECT","objectId":"obj_1","x":10,"y":20.5}"#)
                .unwrap();
        assert_eq!(
            message,
            ClientMessage::MoveObject {
                object_id: ObjectId::from("obj_1"),
                x: 10.0,
                y: 20.5
            }
        );

        let message = ClientMessage::parse(r#"{"type":"TRIGGER_RACE_CONDITION"}"#).unwrap();
        assert_eq!(message, ClientMessage::TriggerRaceCondition { object_id: None });
        assert_eq!(message.kind(), "TRIGGER_RACE_CONDITION");
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = ClientMessage::parse(r#"{"type":"EXPLODE"}"#).unwrap_err();
        assert!(matches!(err, BoardError::Malformed(_)));

        let err = ClientMessage::parse("not json").unwrap_err();
        assert!(matches!(err, BoardError::Malformed(_)));

        let err = ClientMessage::parse(r#"{"objectId":"obj_1"}"#).unwrap_err();
        assert!(matches!(err, BoardError::Malformed(_)));
    }

    #[test]
    fn test_update_requires_object_payload() {
        let err =
            ClientMessage::parse(r#"{"type":"UPDATE_OBJECT","objectId":"obj_1","data":[1,2]}"#)
                .unwrap_err();
        assert!(matches!(err, BoardError::Malformed(_)));
    }

    #[test]
    fn test_only_cursor_move_is_non_mutating() {
        assert!(!ClientMessage::CursorMove { x: 0.0, y: 0.0 }.is_mutating());
        assert!(ClientMessage::DeleteObject {
            object_id: ObjectId::from("obj_1")
        }
        .is_mutating());
    }

    #[test]
    fn test_server_message_serialization() {
        let message = ServerMessage::ObjectMoved {
            object_id: ObjectId::from("obj_1"),
            x: 400.0,
            y: 400.0,
            last_modified: 100,
            last_modified_by: UserId::from("user_1"),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "OBJECT_MOVED");
        assert_eq!(value["objectId"], "obj_1");
        assert_eq!(value["lastModified"], 100);
        assert_eq!(value["lastModifiedBy"], "user_1");
    }

    #[test]
    fn test_error_serialization() {
        let err = BoardError::Unauthorized {
            action: "DELETE_OBJECT",
        };
        let json = serde_json::to_value(ServerMessage::error(&err)).unwrap();
        assert_eq!(json["type"], "ERROR");
        assert_eq!(json["action"], "DELETE_OBJECT");

        let json =
            serde_json::to_string(&ServerMessage::error(&BoardError::Malformed("eof".into())))
                .unwrap();
        assert!(!json.contains("action"));
    }
}
