//! REST endpoints for groups and group messages.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use lavoro_shared::{Attachment, Envelope, Group, GroupMessage, GroupSummary, ServerEvent};

use crate::chat::{broadcast, store};
use crate::db::with_conn;
use crate::error::ApiError;
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub creator: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendGroupMessageRequest {
    pub group_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct EditGroupMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct GroupMessagesResponse {
    pub messages: Vec<GroupMessage>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: String,
}

/// POST /chat/group — create a group; the creator is always a member.
pub async fn create_group(
    State(state): State<AppState>,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Envelope<Group>>), ApiError> {
    let group = with_conn(&state.db, move |conn| {
        store::create_group(
            conn,
            &body.name,
            body.description,
            &body.creator,
            &body.members,
            body.avatar_url,
        )
    })
    .await?;

    Ok((StatusCode::CREATED, Json(Envelope::ok(group))))
}

/// GET /chat/groups/{user_id} — group summaries for the user's groups,
/// recency-descending over last-message time.
pub async fn list_groups(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Envelope<Vec<GroupSummary>>>, ApiError> {
    let summaries =
        with_conn(&state.db, move |conn| store::list_groups(conn, &user_id)).await?;
    Ok(Json(Envelope::ok(summaries)))
}

/// PUT /chat/group/{group_id}/add/{user_id} — members may add users.
pub async fn add_member(
    State(state): State<AppState>,
    Identity(requester_id): Identity,
    Path((group_id, user_id)): Path<(String, String)>,
) -> Result<Json<Envelope<Group>>, ApiError> {
    let group = with_conn(&state.db, move |conn| {
        store::add_group_member(conn, &group_id, &requester_id, &user_id)
    })
    .await?;
    Ok(Json(Envelope::ok(group)))
}

/// PUT /chat/group/{group_id}/remove/{user_id} — self-removal or removal
/// by the creator; the creator cannot be removed.
pub async fn remove_member(
    State(state): State<AppState>,
    Identity(requester_id): Identity,
    Path((group_id, user_id)): Path<(String, String)>,
) -> Result<Json<Envelope<Group>>, ApiError> {
    let group = with_conn(&state.db, move |conn| {
        store::remove_group_member(conn, &group_id, &requester_id, &user_id)
    })
    .await?;
    Ok(Json(Envelope::ok(group)))
}

/// GET /chat/group/{group_id}/{user_id} — group history, members only.
/// Side effect: the requester is recorded in read_by.
pub async fn get_group_messages(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(String, String)>,
) -> Result<Json<Envelope<GroupMessagesResponse>>, ApiError> {
    let messages = with_conn(&state.db, move |conn| {
        store::group_messages(conn, &group_id, &user_id)
    })
    .await?;
    Ok(Json(Envelope::ok(GroupMessagesResponse { messages })))
}

/// POST /chat/group/message — durable group send. Mirrors
/// `new_group_message` to the other members and `group_message_sent` to
/// the sender's sessions.
pub async fn send_group_message(
    State(state): State<AppState>,
    Json(body): Json<SendGroupMessageRequest>,
) -> Result<(StatusCode, Json<Envelope<GroupMessage>>), ApiError> {
    let SendGroupMessageRequest {
        group_id,
        sender_id,
        message,
        attachment,
    } = body;

    let (stored, members) = with_conn(&state.db, move |conn| {
        let stored =
            store::insert_group_message(conn, &group_id, &sender_id, &message, attachment)?;
        let group = store::get_group(conn, &group_id)?;
        Ok((stored, group.members))
    })
    .await?;

    fan_out_group_send(&state, &stored, &members);

    Ok((StatusCode::CREATED, Json(Envelope::ok(stored))))
}

pub(crate) fn fan_out_group_send(state: &AppState, stored: &GroupMessage, members: &[String]) {
    let recipients: Vec<String> = members
        .iter()
        .filter(|m| **m != stored.sender_id)
        .cloned()
        .collect();
    broadcast::send_to_users(
        &state.connections,
        &recipients,
        &ServerEvent::NewGroupMessage {
            message: stored.clone(),
        },
    );
    broadcast::send_to_user(
        &state.connections,
        &stored.sender_id,
        &ServerEvent::GroupMessageSent {
            message: stored.clone(),
        },
    );
}

/// PUT /chat/group/message/{id} — sender-only edit; mirrors
/// `group_message_updated` to all members.
pub async fn update_group_message(
    State(state): State<AppState>,
    Identity(requester_id): Identity,
    Path(id): Path<String>,
    Json(body): Json<EditGroupMessageRequest>,
) -> Result<Json<Envelope<GroupMessage>>, ApiError> {
    let (updated, members) = with_conn(&state.db, move |conn| {
        let updated = store::edit_group_message(conn, &id, &requester_id, &body.message)?;
        let group = store::get_group(conn, &updated.group_id)?;
        Ok((updated, group.members))
    })
    .await?;

    broadcast::send_to_users(
        &state.connections,
        &members,
        &ServerEvent::GroupMessageUpdated {
            message: updated.clone(),
        },
    );

    Ok(Json(Envelope::ok(updated)))
}

/// DELETE /chat/group/message/{id} — sender or group creator; mirrors
/// `group_message_deleted` to all members.
pub async fn delete_group_message(
    State(state): State<AppState>,
    Identity(requester_id): Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<DeletedResponse>>, ApiError> {
    let (removed, members) = with_conn(&state.db, move |conn| {
        let removed = store::delete_group_message(conn, &id, &requester_id)?;
        let group = store::get_group(conn, &removed.group_id)?;
        Ok((removed, group.members))
    })
    .await?;

    broadcast::send_to_users(
        &state.connections,
        &members,
        &ServerEvent::GroupMessageDeleted {
            message_id: removed.id.clone(),
            group_id: removed.group_id.clone(),
        },
    );

    Ok(Json(Envelope::ok_with_message(
        DeletedResponse { id: removed.id },
        "group message deleted",
    )))
}
