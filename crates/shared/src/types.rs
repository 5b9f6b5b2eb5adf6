//! Common types used across SyncBoard

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper (`user_<n>`, unique within the process)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn from_sequence(n: u64) -> Self {
        Self(format!("user_{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Board object ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    /// Generate a fresh id embedding `millis` and a random suffix
    pub fn generate_at(millis: i64) -> Self {
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..9)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(format!("obj_{millis}_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// =============================================================================
// Time
// =============================================================================

/// Milliseconds since the Unix epoch, the server's only clock
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

// =============================================================================
// Users
// =============================================================================

/// Role assigned at join time, fixed for the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Editor,
    Viewer,
}

impl Role {
    /// Parse the `userRole` join parameter. Anything other than `viewer`
    /// (including a missing value) joins as an editor.
    pub fn from_param(param: Option<&str>) -> Self {
        match param.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("viewer") => Role::Viewer,
            _ => Role::Editor,
        }
    }

    pub fn can_edit(&self) -> bool {
        matches!(self, Role::Editor)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

/// Public view of a room member, as carried in `USER_JOINED` and `INITIAL_STATE`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub color: String,
    pub role: Role,
}

/// Cursor colours handed out when a client doesn't pick one
pub const COLOR_PALETTE: [&str; 12] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7B731", "#5F27CD", "#00D2D3",
    "#FF6348", "#1DD1A1", "#EE5A6F", "#C44569",
];

pub fn random_color() -> String {
    let idx = rand::thread_rng().gen_range(0..COLOR_PALETTE.len());
    COLOR_PALETTE[idx].to_string()
}

// =============================================================================
// Board Objects
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    StickyNote,
    Drawing,
    Shape,
}

/// Type-specific payload. Notes carry text and geometry, drawings a point
/// sequence, shapes their parameters; updates shallow-merge into it.
pub type ObjectData = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardObject {
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub data: ObjectData,
    pub created_at: i64,
    pub created_by: UserId,
    pub last_modified: i64,
    pub last_modified_by: UserId,
}

impl BoardObject {
    pub fn new(
        id: ObjectId,
        object_type: ObjectType,
        data: ObjectData,
        created_by: UserId,
        now: i64,
    ) -> Self {
        Self {
            id,
            object_type,
            data,
            created_at: now,
            created_by: created_by.clone(),
            last_modified: now,
            last_modified_by: created_by,
        }
    }

    /// Shallow-merge `delta` into the payload; top-level keys are replaced
    pub fn merge_data(&mut self, delta: &ObjectData) {
        for (key, value) in delta {
            self.data.insert(key.clone(), value.clone());
        }
    }

    /// Position stored in the payload, if both coordinates are numeric
    pub fn position(&self) -> Option<(f64, f64)> {
        let x = self.data.get("x")?.as_f64()?;
        let y = self.data.get("y")?.as_f64()?;
        Some((x, y))
    }

    pub fn set_position(&mut self, x: f64, y: f64) {
        self.data.insert("x".to_string(), Value::from(x));
        self.data.insert("y".to_string(), Value::from(y));
    }
}

// =============================================================================
// Presence
// =============================================================================

/// Last known cursor location of a user; no history is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    pub user_id: UserId,
    pub x: f64,
    pub y: f64,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_object_ids_are_distinct() {
        let a = ObjectId::generate_at(1_700_000_000_000);
        let b = ObjectId::generate_at(1_700_000_000_000);
        assert!(a.as_str().starts_with("obj_1700000000000_"));
        assert_eq!(a.as_str().len(), "obj_1700000000000_".len() + 9);
        assert_ne!(a, b);
    }

    #[test]
    fn test_role_from_param() {
        assert_eq!(Role::from_param(None), Role::Editor);
        assert_eq!(Role::from_param(Some("editor")), Role::Editor);
        assert_eq!(Role::from_param(Some("Viewer")), Role::Viewer);
        assert_eq!(Role::from_param(Some("admin")), Role::Editor);
        assert!(!Role::Viewer.can_edit());
    }

    #[test]
    fn test_random_color_comes_from_palette() {
        for _ in 0..50 {
            let color = random_color();
            assert!(COLOR_PALETTE.contains(&color.as_str()));
        }
    }

    #[test]
    fn test_board_object_serialization() {
        let data = json!({"x": 0, "y": 0, "text": "hi"});
        let object = BoardObject::new(
            ObjectId::from("obj_1"),
            ObjectType::StickyNote,
            data.as_object().cloned().unwrap_or_default(),
            UserId::from("user_1"),
            42,
        );
        let value = serde_json::to_value(&object).unwrap();
        assert_eq!(value["type"], "STICKY_NOTE");
        assert_eq!(value["createdBy"], "user_1");
        assert_eq!(value["lastModified"], 42);
        assert_eq!(value["data"]["text"], "hi");
    }

    #[test]
    fn test_merge_data_is_shallow() {
        let mut object = BoardObject::new(
            ObjectId::from("obj_1"),
            ObjectType::Shape,
            json!({"x": 1, "style": {"fill": "red", "stroke": "blue"}})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            UserId::from("user_1"),
            1,
        );
        let delta = json!({"style": {"fill": "green"}});
        object.merge_data(delta.as_object().unwrap());

        assert_eq!(object.data["x"], 1);
        assert_eq!(object.data["style"], json!({"fill": "green"}));
    }

    #[test]
    fn test_position_roundtrip() {
        let mut object = BoardObject::new(
            ObjectId::from("obj_1"),
            ObjectType::StickyNote,
            ObjectData::new(),
            UserId::from("user_1"),
            1,
        );
        assert_eq!(object.position(), None);
        object.set_position(200.0, 150.5);
        assert_eq!(object.position(), Some((200.0, 150.5)));
    }
}
