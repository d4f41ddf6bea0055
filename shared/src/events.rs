//! Real-time event catalogue.
//!
//! Events travel as JSON text frames with a `type` tag, e.g.
//! `{"type":"private_message","sender_id":"...","receiver_id":"...","body":"hi"}`.
//!
//! Delivery is at-most-once and best-effort: a disconnected client misses
//! events and reconciles through the REST read paths.

use serde::{Deserialize, Serialize};

use crate::model::{Attachment, GroupMessage, Message};

/// Events a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Binds the connection to a user identity. Idempotent when repeated
    /// with the same id; repeating with a different id rebinds.
    UserConnected {
        user_id: String,
    },
    /// Fast-path direct send. Performs the same durable write as
    /// `POST /chat/message`; the client cache deduplicates the echo.
    PrivateMessage {
        sender_id: String,
        receiver_id: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
    },
    /// Fast-path group send, mirroring `POST /chat/group/message`.
    GroupMessage {
        group_id: String,
        sender_id: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
    },
    Typing {
        sender_id: String,
        receiver_id: String,
    },
    StopTyping {
        sender_id: String,
        receiver_id: String,
    },
    UpdateMessage {
        message_id: String,
        requester_id: String,
        body: String,
    },
    UpdateGroupMessage {
        message_id: String,
        requester_id: String,
        body: String,
    },
}

/// Events the server pushes to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message addressed to the receiving user arrived.
    NewMessage { message: Message },
    /// Ack of a send, delivered to all of the sender's sessions so the
    /// optimistic entry can be promoted to the canonical record.
    MessageSent { message: Message },
    NewGroupMessage { message: GroupMessage },
    GroupMessageSent { message: GroupMessage },
    MessageUpdated { message: Message },
    GroupMessageUpdated { message: GroupMessage },
    MessageDeleted {
        message_id: String,
        sender_id: String,
        receiver_id: String,
    },
    GroupMessageDeleted {
        message_id: String,
        group_id: String,
    },
    UserTyping {
        sender_id: String,
        receiver_id: String,
    },
    UserStopTyping {
        sender_id: String,
        receiver_id: String,
    },
    /// Protocol-level rejection of a client event (unbound identity,
    /// failed write, malformed frame).
    Error { code: u16, message: String },
}
