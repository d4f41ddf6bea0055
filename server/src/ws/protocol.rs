//! JSON event dispatch for a single WebSocket connection.
//!
//! Send and edit events perform the same durable writes as their REST
//! counterparts; the socket is a low-latency fast path, not a separate
//! store. Typing indicators are pure relays. Delivery stays at-most-once:
//! whoever is not connected at emission time reconciles over REST.

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use lavoro_shared::{ClientEvent, ServerEvent};

use crate::chat::{broadcast, groups, store};
use crate::db::with_conn;
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::actor;

/// Handle an incoming text frame: decode the client event and dispatch.
pub async fn handle_text_frame(
    text: &str,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    identity: &mut Option<String>,
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = identity.as_deref().unwrap_or("unbound"),
                error = %e,
                "Failed to decode client event"
            );
            send_error(tx, 400, "malformed event");
            return;
        }
    };

    if let ClientEvent::UserConnected { user_id } = &event {
        bind_identity(state, tx, identity, user_id);
        return;
    }

    // Everything else requires a bound identity.
    let Some(bound) = identity.clone() else {
        send_error(tx, 401, "announce identity with user_connected first");
        return;
    };

    if let Err(e) = dispatch(event, state, &bound).await {
        send_error(tx, error_code(&e), &e.to_string());
    }
}

/// Bind (or rebind) this connection's identity. Announcing the same id
/// again is a no-op; a different id moves the connection between registry
/// entries.
fn bind_identity(
    state: &AppState,
    tx: &mpsc::UnboundedSender<Message>,
    identity: &mut Option<String>,
    user_id: &str,
) {
    match identity {
        Some(current) if current == user_id => {}
        _ => {
            if let Some(previous) = identity.take() {
                actor::unregister_connection(state, &previous, tx);
            }
            actor::register_connection(state, user_id, tx.clone());
            *identity = Some(user_id.to_string());
            tracing::info!(user_id = %user_id, "connection bound to identity");
        }
    }
}

async fn dispatch(event: ClientEvent, state: &AppState, bound: &str) -> Result<(), ApiError> {
    match event {
        ClientEvent::UserConnected { .. } => unreachable!("handled before dispatch"),

        ClientEvent::PrivateMessage {
            sender_id,
            receiver_id,
            body,
            attachment,
        } => {
            require_self(bound, &sender_id)?;
            let stored = with_conn(&state.db, move |conn| {
                store::insert_direct_message(conn, &sender_id, &receiver_id, &body, attachment)
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
            Ok(())
        }

        ClientEvent::GroupMessage {
            group_id,
            sender_id,
            body,
            attachment,
        } => {
            require_self(bound, &sender_id)?;
            let (stored, members) = with_conn(&state.db, move |conn| {
                let stored = store::insert_group_message(
                    conn, &group_id, &sender_id, &body, attachment,
                )?;
                let group = store::get_group(conn, &group_id)?;
                Ok((stored, group.members))
            })
            .await?;

            groups::fan_out_group_send(state, &stored, &members);
            Ok(())
        }

        ClientEvent::Typing {
            sender_id,
            receiver_id,
        } => {
            require_self(bound, &sender_id)?;
            broadcast::send_to_user(
                &state.connections,
                &receiver_id,
                &ServerEvent::UserTyping {
                    sender_id,
                    receiver_id: receiver_id.clone(),
                },
            );
            Ok(())
        }

        ClientEvent::StopTyping {
            sender_id,
            receiver_id,
        } => {
            require_self(bound, &sender_id)?;
            broadcast::send_to_user(
                &state.connections,
                &receiver_id,
                &ServerEvent::UserStopTyping {
                    sender_id,
                    receiver_id: receiver_id.clone(),
                },
            );
            Ok(())
        }

        ClientEvent::UpdateMessage {
            message_id,
            requester_id,
            body,
        } => {
            require_self(bound, &requester_id)?;
            let updated = with_conn(&state.db, move |conn| {
                store::edit_direct_message(conn, &message_id, &requester_id, &body)
            })
            .await?;

            let event = ServerEvent::MessageUpdated {
                message: updated.clone(),
            };
            broadcast::send_to_user(&state.connections, &updated.sender_id, &event);
            broadcast::send_to_user(&state.connections, &updated.receiver_id, &event);
            Ok(())
        }

        ClientEvent::UpdateGroupMessage {
            message_id,
            requester_id,
            body,
        } => {
            require_self(bound, &requester_id)?;
            let (updated, members) = with_conn(&state.db, move |conn| {
                let updated = store::edit_group_message(conn, &message_id, &requester_id, &body)?;
                let group = store::get_group(conn, &updated.group_id)?;
                Ok((updated, group.members))
            })
            .await?;

            broadcast::send_to_users(
                &state.connections,
                &members,
                &ServerEvent::GroupMessageUpdated { message: updated },
            );
            Ok(())
        }
    }
}

/// Socket events must act on behalf of the announced identity.
fn require_self(bound: &str, claimed: &str) -> Result<(), ApiError> {
    if bound != claimed {
        return Err(ApiError::Authorization(format!(
            "event sender {claimed} does not match connection identity"
        )));
    }
    Ok(())
}

fn error_code(e: &ApiError) -> u16 {
    match e {
        ApiError::Validation(_) => 400,
        ApiError::Authorization(_) => 403,
        ApiError::NotFound(_) => 404,
        ApiError::Database(_) | ApiError::Internal(_) => 500,
    }
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, code: u16, message: &str) {
    let event = ServerEvent::Error {
        code,
        message: message.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = tx.send(Message::Text(json.into()));
    }
}
