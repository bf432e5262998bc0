//! JSON wire protocol for design operations.
//!
//! One [`Operation`] per WebSocket text frame:
//! ```text
//! {
//!   "type":      "ADD_COMPONENT" | ... | "CURSOR_MOVE",
//!   "userId":    "u-1",
//!   "timestamp": 1718000000000,          // ms since epoch, sender clock
//!   "payload":   { "component"?, "componentId"?, "direction"?,
//!                  "cursor"?, "user"? }
//! }
//! ```
//! There is no acknowledgement frame; delivery is fire-and-forget.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use forma_core::{Component, Direction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    AddComponent,
    UpdateComponent,
    DeleteComponent,
    MoveComponent,
    SelectComponent,
    ClearSelection,
    CursorMove,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddComponent => "ADD_COMPONENT",
            Self::UpdateComponent => "UPDATE_COMPONENT",
            Self::DeleteComponent => "DELETE_COMPONENT",
            Self::MoveComponent => "MOVE_COMPONENT",
            Self::SelectComponent => "SELECT_COMPONENT",
            Self::ClearSelection => "CLEAR_SELECTION",
            Self::CursorMove => "CURSOR_MOVE",
        }
    }

    /// Whether this kind touches the document tree (as opposed to presence).
    pub fn is_document_edit(&self) -> bool {
        !matches!(self, Self::CursorMove)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cursor position in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

impl CursorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Presence record of a collaborator. Lives only as long as the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub cursor: CursorPosition,
    /// Component the user is currently editing.
    #[serde(default)]
    pub selection: Option<String>,
}

impl OnlineUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: avatar.into(),
            cursor: CursorPosition::default(),
            selection: None,
        }
    }

    /// Placeholder for a peer seen before its identity arrived.
    pub fn anonymous(id: &str) -> Self {
        let short: String = id.chars().take(8).collect();
        Self::new(id, format!("Peer-{short}"), "")
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Component>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<OnlineUser>,
}

impl OperationPayload {
    pub fn component(component: Component) -> Self {
        Self {
            component: Some(component),
            ..Self::default()
        }
    }

    pub fn component_id(id: impl Into<String>) -> Self {
        Self {
            component_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn movement(id: impl Into<String>, direction: Direction) -> Self {
        Self {
            component_id: Some(id.into()),
            direction: Some(direction),
            ..Self::default()
        }
    }

    pub fn cursor(cursor: CursorPosition, user: Option<OnlineUser>) -> Self {
        Self {
            cursor: Some(cursor),
            user,
            ..Self::default()
        }
    }
}

/// One atomic, timestamped edit broadcast to every collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub user_id: String,
    /// Sender wall clock in ms; the only ordering key.
    pub timestamp: u64,
    #[serde(default)]
    pub payload: OperationPayload,
}

impl Operation {
    pub fn new(
        op_type: OperationType,
        user_id: impl Into<String>,
        timestamp: u64,
        payload: OperationPayload,
    ) -> Self {
        Self {
            op_type,
            user_id: user_id.into(),
            timestamp,
            payload,
        }
    }

    pub fn add_component(user_id: impl Into<String>, timestamp: u64, component: Component) -> Self {
        Self::new(OperationType::AddComponent, user_id, timestamp, OperationPayload::component(component))
    }

    pub fn update_component(user_id: impl Into<String>, timestamp: u64, component: Component) -> Self {
        Self::new(OperationType::UpdateComponent, user_id, timestamp, OperationPayload::component(component))
    }

    pub fn delete_component(user_id: impl Into<String>, timestamp: u64, id: impl Into<String>) -> Self {
        Self::new(OperationType::DeleteComponent, user_id, timestamp, OperationPayload::component_id(id))
    }

    pub fn move_component(
        user_id: impl Into<String>,
        timestamp: u64,
        id: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self::new(OperationType::MoveComponent, user_id, timestamp, OperationPayload::movement(id, direction))
    }

    pub fn select_component(user_id: impl Into<String>, timestamp: u64, id: Option<String>) -> Self {
        let payload = OperationPayload {
            component_id: id,
            ..OperationPayload::default()
        };
        Self::new(OperationType::SelectComponent, user_id, timestamp, payload)
    }

    pub fn clear_selection(user_id: impl Into<String>, timestamp: u64) -> Self {
        Self::new(OperationType::ClearSelection, user_id, timestamp, OperationPayload::default())
    }

    /// Cursor move carrying the full identity of `user`, so peers can
    /// populate presence from any cursor frame.
    pub fn cursor_move(user: &OnlineUser, timestamp: u64) -> Self {
        Self::new(
            OperationType::CursorMove,
            user.id.clone(),
            timestamp,
            OperationPayload::cursor(user.cursor, Some(user.clone())),
        )
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    pub fn require_component(&self) -> Result<&Component, ProtocolError> {
        self.payload.component.as_ref().ok_or(ProtocolError::MissingPayload {
            op: self.op_type,
            field: "component",
        })
    }

    pub fn require_component_id(&self) -> Result<&str, ProtocolError> {
        self.payload
            .component_id
            .as_deref()
            .ok_or(ProtocolError::MissingPayload {
                op: self.op_type,
                field: "componentId",
            })
    }

    pub fn require_direction(&self) -> Result<Direction, ProtocolError> {
        self.payload.direction.ok_or(ProtocolError::MissingPayload {
            op: self.op_type,
            field: "direction",
        })
    }
}

/// Current wall clock in ms since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("{op} is missing payload field '{field}'")]
    MissingPayload { op: OperationType, field: &'static str },
}
