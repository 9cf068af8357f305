use chrono::{DateTime, NaiveDateTime, Utc};
use relay_hub::timestamp_now;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
impl User {
    pub fn new(id: &str, email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            nickname: None,
            created_at: timestamp_now(),
        }
    }
}

impl User {
    /// "First Last", trimmed. Empty when the user never set a name.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: String,
}

impl Session {
    /// Parse `expires_at`, accepting RFC 3339 or SQLite's `YYYY-MM-DD HH:MM:SS`.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(&self.expires_at) {
            return Some(t.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.expires_at, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|t| t.and_utc())
    }

    /// Sessions with an unreadable expiry are treated as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at_utc().is_none_or(|t| t <= now)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub owner_user_id: String,
    pub title: String,
    pub description: String,
    pub created_at: String,
}

/// A direct message as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessageView {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<String>,
    pub is_from_me: bool,
}

/// A group message as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessageView {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
    pub is_from_me: bool,
}

/// One row of the conversation list: the latest direct message exchanged
/// with a peer plus the caller's unread count from that peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub user_id: String,
    pub user_name: String,
    pub last_message: String,
    pub last_message_time: String,
    pub unread_count: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub actor_user_id: Option<String>,
    pub subject_id: Option<String>,
    pub message: String,
    pub action_url: Option<String>,
    pub created_at: String,
    pub read_at: Option<String>,
}

impl NotificationRecord {
    pub fn new(user_id: &str, kind: &str, message: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            actor_user_id: None,
            subject_id: None,
            message: message.to_string(),
            action_url: None,
            created_at: timestamp_now(),
            read_at: None,
        }
    }

    pub fn with_actor(mut self, actor_user_id: &str) -> Self {
        self.actor_user_id = Some(actor_user_id.to_string());
        self
    }

    pub fn with_subject(mut self, subject_id: &str) -> Self {
        self.subject_id = Some(subject_id.to_string());
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    /// The live envelope payload pushed to the user's connections.
    pub fn to_envelope(&self) -> relay_hub::Notification {
        relay_hub::Notification {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            message: self.message.clone(),
            action_url: self.action_url.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendDirectRequest {
    #[serde(default)]
    pub recipient_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendGroupRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteRequest {
    #[serde(default)]
    pub user_id: String,
}

/// Reply for the invite and join-request endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReply {
    pub id: String,
    pub status: String,
}

impl PendingReply {
    pub fn new(id: String) -> Self {
        Self {
            id,
            status: "pending".to_string(),
        }
    }
}
