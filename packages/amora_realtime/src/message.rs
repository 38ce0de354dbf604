//! Message and REST payload models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timefmt::{deserialize_optional_timestamp, deserialize_timestamp};

/// One chat message. Identity is `message_id`: the same id seen over push
/// and over poll is the same message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(alias = "created_at", deserialize_with = "deserialize_timestamp")]
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Whether this message belongs to the conversation with `counterpart`.
    pub fn involves(&self, counterpart: &str) -> bool {
        self.sender_id == counterpart || self.receiver_id == counterpart
    }
}

/// Body of `POST /messages/`.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
}

/// Response of `POST /messages/`. Only the id is guaranteed.
#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
    #[serde(
        default,
        alias = "created_at",
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub sent_at: Option<DateTime<Utc>>,
}

/// Profile summary shown in a conversation header (`GET /users/{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl UserSummary {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("User")
    }
}

/// One row of `GET /messages/{user_id}/conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(alias = "user_id")]
    pub other_user_id: String,
    #[serde(default, alias = "name")]
    pub other_user_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(
        default,
        alias = "last_message_at",
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

/// `GET /messages/unread/{user_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnreadCounts {
    #[serde(default, alias = "total_unread")]
    pub unread_count: u32,
    #[serde(default)]
    pub by_sender: std::collections::HashMap<String, u32>,
}
