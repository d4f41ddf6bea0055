//! Typed event fan-out to connected WebSocket clients.
//!
//! Fan-out is best-effort and at-most-once: users without an active
//! connection simply miss the event and reconcile through the REST read
//! paths. A send failure on a stale connection is ignored; the actor's
//! cleanup removes the dead sender.

use axum::extract::ws::Message;

use lavoro_shared::ServerEvent;

use crate::ws::ConnectionRegistry;

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server event");
            None
        }
    }
}

/// Send an event to all active connections of a single user.
pub fn send_to_user(registry: &ConnectionRegistry, user_id: &str, event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };
    if let Some(connections) = registry.get(user_id) {
        for sender in connections.value().iter() {
            let _ = sender.send(msg.clone());
        }
    }
}

/// Send an event to every listed user, skipping duplicates in the list.
pub fn send_to_users(registry: &ConnectionRegistry, user_ids: &[String], event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };
    let mut seen: Vec<&str> = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        if seen.contains(&user_id.as_str()) {
            continue;
        }
        seen.push(user_id);
        if let Some(connections) = registry.get(user_id) {
            for sender in connections.value().iter() {
                let _ = sender.send(msg.clone());
            }
        }
    }
}
