//! Conversation summaries and contacts.

use axum::{
    extract::{Path, State},
    Json,
};

use lavoro_shared::{Contact, ConversationSummary, Envelope};

use crate::chat::store;
use crate::db::with_conn;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /chat/user/{user_id} — conversation summaries, recency-descending.
/// Only conversations with at least one real message are listed; draft
/// conversations exist solely in the client cache until the first send.
pub async fn list_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Envelope<Vec<ConversationSummary>>>, ApiError> {
    let summaries =
        with_conn(&state.db, move |conn| store::list_conversations(conn, &user_id)).await?;
    Ok(Json(Envelope::ok(summaries)))
}

/// GET /chat/contacts/{user_id} — all addressable users except the
/// requester.
pub async fn list_contacts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Envelope<Vec<Contact>>>, ApiError> {
    let contacts =
        with_conn(&state.db, move |conn| store::list_contacts(conn, &user_id)).await?;
    Ok(Json(Envelope::ok(contacts)))
}

/// PUT /chat/contacts — upsert a contact record. This is the sync seam
/// for the external identity service.
pub async fn upsert_contact(
    State(state): State<AppState>,
    Json(contact): Json<Contact>,
) -> Result<Json<Envelope<Contact>>, ApiError> {
    let stored = with_conn(&state.db, move |conn| {
        store::upsert_contact(conn, &contact)?;
        Ok(contact)
    })
    .await?;
    Ok(Json(Envelope::ok(stored)))
}
