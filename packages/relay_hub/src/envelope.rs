//! Wire-level payload shapes
//!
//! Outbound envelopes are JSON objects discriminated by `type`. Optional
//! fields are omitted when empty so clients see the same shape whether a
//! message arrives live or from the history endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HubError;

/// Timestamp format used in `created_at` fields (UTC, second precision).
pub fn timestamp_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// A chat message, either direct (user to user) or posted to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<String>,
}

impl ChatMessage {
    /// New direct message with a fresh id and the current timestamp.
    pub fn direct(sender_id: &str, recipient_id: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            sender_name: None,
            recipient_id: Some(recipient_id.to_string()),
            group_id: None,
            content: content.to_string(),
            created_at: timestamp_now(),
            read_at: None,
        }
    }

    /// New group message with a fresh id and the current timestamp.
    pub fn group(sender_id: &str, group_id: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            sender_name: None,
            recipient_id: None,
            group_id: Some(group_id.to_string()),
            content: content.to_string(),
            created_at: timestamp_now(),
            read_at: None,
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.sender_name = (!name.trim().is_empty()).then_some(name);
        self
    }
}

/// A system notification addressed to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub created_at: String,
}

impl Notification {
    pub fn new(user_id: &str, message: &str, action_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            action_url,
            created_at: timestamp_now(),
        }
    }
}

/// Outbound envelope. The variant becomes the `type` field on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Direct(ChatMessage),
    Group(ChatMessage),
    Notification(Notification),
}

/// Where an envelope is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    User(String),
    Group(String),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Envelope {
    /// Resolve the addressing mode. A recipient wins over a group; an
    /// envelope with neither cannot be routed.
    pub fn route(&self) -> Result<Route, HubError> {
        match self {
            Envelope::Direct(msg) | Envelope::Group(msg) => {
                if let Some(user) = non_empty(&msg.recipient_id) {
                    Ok(Route::User(user.to_string()))
                } else if let Some(group) = non_empty(&msg.group_id) {
                    Ok(Route::Group(group.to_string()))
                } else {
                    Err(HubError::Unaddressed)
                }
            }
            Envelope::Notification(n) if !n.user_id.is_empty() => {
                Ok(Route::User(n.user_id.clone()))
            }
            Envelope::Notification(_) => Err(HubError::Unaddressed),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Direct(_) => "direct",
            Envelope::Group(_) => "group",
            Envelope::Notification(_) => "notification",
        }
    }

    pub fn to_json(&self) -> Result<String, HubError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages a client sends over its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    SubscribeGroup {
        #[serde(default)]
        to: String,
    },
    Direct {
        #[serde(default)]
        to: String,
        #[serde(default)]
        text: String,
    },
    Group {
        #[serde(default)]
        to: String,
        #[serde(default)]
        text: String,
    },
}

impl ControlMessage {
    /// Parse and validate an inbound text frame. Messages with an empty
    /// target, or chat messages with empty text, are rejected.
    pub fn parse(raw: &str) -> Result<Self, HubError> {
        let msg: ControlMessage =
            serde_json::from_str(raw).map_err(|e| HubError::MalformedControl(e.to_string()))?;

        match &msg {
            ControlMessage::SubscribeGroup { to } if to.is_empty() => {
                Err(HubError::IncompleteControl {
                    kind: "subscribe_group",
                    field: "to",
                })
            }
            ControlMessage::Direct { to, .. } | ControlMessage::Group { to, .. }
                if to.is_empty() =>
            {
                Err(HubError::IncompleteControl {
                    kind: msg.kind(),
                    field: "to",
                })
            }
            ControlMessage::Direct { text, .. } | ControlMessage::Group { text, .. }
                if text.is_empty() =>
            {
                Err(HubError::IncompleteControl {
                    kind: msg.kind(),
                    field: "text",
                })
            }
            _ => Ok(msg),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::SubscribeGroup { .. } => "subscribe_group",
            ControlMessage::Direct { .. } => "direct",
            ControlMessage::Group { .. } => "group",
        }
    }
}
