//! Data model DTOs exchanged between server and client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attachment metadata. The file bytes live behind an externally provided
/// URL; the chat service never stores or proxies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    /// Coarse kind hint for rendering: "image", "file", ...
    pub kind: String,
}

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

/// A message inside a group thread. Read state is tracked per member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub read_by: Vec<String>,
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

/// A named set of users sharing one message thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub creator_id: String,
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An addressable user as seen by the chat service. Identity management
/// itself lives in an external service; contacts are mirrored records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// One entry in a user's conversation sidebar: the counterpart, the most
/// recent message, and how many messages are still unread.
///
/// Summaries are a read-time projection over the message collection, never
/// authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub counterpart: Contact,
    pub last_message: Message,
    pub unread_count: u32,
}

/// Group counterpart of [`ConversationSummary`]. A group with no messages
/// yet has no `last_message` and sorts by its creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group: Group,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<GroupMessage>,
    pub unread_count: u32,
}

impl GroupSummary {
    /// Sort key for recency ordering: last message time, falling back to
    /// the group's creation time when the thread is still empty.
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.sent_at)
            .unwrap_or(self.group.created_at)
    }
}
