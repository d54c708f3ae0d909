// WebSocket message types for the picture edit channel.

use serde::{Deserialize, Serialize};

use crate::types::UserView;

/// Inbound message kind declared by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    EnterEdit,
    ExitEdit,
    EditAction,
    /// Any type string this relay build does not understand.
    #[serde(other)]
    Unrecognized,
}

impl RequestType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EnterEdit => "ENTER_EDIT",
            Self::ExitEdit => "EXIT_EDIT",
            Self::EditAction => "EDIT_ACTION",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }
}

/// Client -> Server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    #[serde(rename = "type")]
    pub kind: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_action: Option<String>,
}

impl EditRequest {
    pub fn new(kind: RequestType) -> Self {
        Self { kind, edit_action: None }
    }

    pub fn edit_action(action: impl Into<String>) -> Self {
        Self { kind: RequestType::EditAction, edit_action: Some(action.into()) }
    }
}

/// Outbound notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Info,
    Error,
    EnterEdit,
    EditAction,
    ExitEdit,
}

/// Server -> Client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditNotification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_action: Option<String>,
    pub user: UserView,
}

impl EditNotification {
    pub fn new(kind: NotificationType, message: impl Into<String>, user: UserView) -> Self {
        Self { kind, message: message.into(), edit_action: None, user }
    }

    pub fn with_edit_action(mut self, action: impl Into<String>) -> Self {
        self.edit_action = Some(action.into());
        self
    }
}

/// Edit actions the stock picture editor emits.
///
/// Actions are forwarded verbatim whether or not they appear here; the
/// catalog only supplies the human-readable label for notification text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownEditAction {
    ZoomIn,
    ZoomOut,
    RotateLeft,
    RotateRight,
}

impl KnownEditAction {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "ZOOM_IN" => Some(Self::ZoomIn),
            "ZOOM_OUT" => Some(Self::ZoomOut),
            "ROTATE_LEFT" => Some(Self::RotateLeft),
            "ROTATE_RIGHT" => Some(Self::RotateRight),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::ZoomIn => "zoom in",
            Self::ZoomOut => "zoom out",
            Self::RotateLeft => "rotate left",
            Self::RotateRight => "rotate right",
        }
    }
}

/// Label used in notification text for an arbitrary action string.
pub fn edit_action_label(action: &str) -> &str {
    KnownEditAction::from_wire(action).map(KnownEditAction::label).unwrap_or(action)
}

/// Inbound frame that could not be turned into an [`EditRequest`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed edit request: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn decode_request(raw: &str) -> Result<EditRequest, ProtocolError> {
    Ok(serde_json::from_str::<EditRequest>(raw)?)
}

pub fn encode_notification(message: &EditNotification) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
