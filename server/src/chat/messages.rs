//! REST endpoints for direct messages.
//!
//! The REST write is the durable path; after each successful write the
//! change is mirrored to connected clients over the real-time channel so
//! they update without a reload. The two paths are deliberately
//! unordered (see the client cache's deduplication).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use lavoro_shared::{Attachment, Envelope, Message, ServerEvent};

use crate::chat::{broadcast, store};
use crate::db::with_conn;
use crate::error::ApiError;
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: String,
}

/// POST /chat/message — durable direct send.
/// Mirrors the write as `new_message` to the receiver and `message_sent`
/// to the sender's sessions.
pub async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Envelope<Message>>), ApiError> {
    let SendMessageRequest {
        sender_id,
        receiver_id,
        message,
        attachment,
    } = body;

    let stored = with_conn(&state.db, move |conn| {
        store::insert_direct_message(conn, &sender_id, &receiver_id, &message, attachment)
    })
    .await?;

    broadcast::send_to_user(
        &state.connections,
        &stored.receiver_id,
        &ServerEvent::NewMessage {
            message: stored.clone(),
        },
    );
    broadcast::send_to_user(
        &state.connections,
        &stored.sender_id,
        &ServerEvent::MessageSent {
            message: stored.clone(),
        },
    );

    Ok((StatusCode::CREATED, Json(Envelope::ok(stored))))
}

/// GET /chat/conversation/{user_id}/{other_user_id} — full history,
/// ascending. Side effect: messages addressed to `{user_id}` are marked
/// read (the fetch is the "conversation opened" signal).
pub async fn get_conversation(
    State(state): State<AppState>,
    Path((user_id, other_user_id)): Path<(String, String)>,
) -> Result<Json<Envelope<ConversationResponse>>, ApiError> {
    let messages = with_conn(&state.db, move |conn| {
        store::conversation_between(conn, &user_id, &other_user_id)
    })
    .await?;

    Ok(Json(Envelope::ok(ConversationResponse { messages })))
}

/// PUT /chat/message/{id} — sender-only edit; mirrors `message_updated`
/// to both participants.
pub async fn update_message(
    State(state): State<AppState>,
    Identity(requester_id): Identity,
    Path(id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<Envelope<Message>>, ApiError> {
    let updated = with_conn(&state.db, move |conn| {
        store::edit_direct_message(conn, &id, &requester_id, &body.message)
    })
    .await?;

    let event = ServerEvent::MessageUpdated {
        message: updated.clone(),
    };
    broadcast::send_to_user(&state.connections, &updated.sender_id, &event);
    broadcast::send_to_user(&state.connections, &updated.receiver_id, &event);

    Ok(Json(Envelope::ok(updated)))
}

/// DELETE /chat/message/{id} — sender-only; mirrors `message_deleted` to
/// both participants so connected clients drop the message without a
/// reload.
pub async fn delete_message(
    State(state): State<AppState>,
    Identity(requester_id): Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<DeletedResponse>>, ApiError> {
    let removed = with_conn(&state.db, move |conn| {
        store::delete_direct_message(conn, &id, &requester_id)
    })
    .await?;

    let event = ServerEvent::MessageDeleted {
        message_id: removed.id.clone(),
        sender_id: removed.sender_id.clone(),
        receiver_id: removed.receiver_id.clone(),
    };
    broadcast::send_to_user(&state.connections, &removed.sender_id, &event);
    broadcast::send_to_user(&state.connections, &removed.receiver_id, &event);

    Ok(Json(Envelope::ok_with_message(
        DeletedResponse { id: removed.id },
        "message deleted",
    )))
}
