use axum::{routing, Router};

use crate::chat::{conversations, groups, messages};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router.
///
/// Note: `/chat/group/message/{id}` overlaps with
/// `/chat/group/{group_id}/{user_id}`; the static `message` segment takes
/// priority in the route matcher.
pub fn build_router(state: AppState) -> Router {
    let contact_routes = Router::new()
        .route(
            "/chat/contacts/{user_id}",
            routing::get(conversations::list_contacts),
        )
        .route("/chat/contacts", routing::put(conversations::upsert_contact));

    let message_routes = Router::new()
        .route(
            "/chat/user/{user_id}",
            routing::get(conversations::list_conversations),
        )
        .route(
            "/chat/conversation/{user_id}/{other_user_id}",
            routing::get(messages::get_conversation),
        )
        .route("/chat/message", routing::post(messages::send_message))
        .route(
            "/chat/message/{id}",
            routing::put(messages::update_message).delete(messages::delete_message),
        );

    let group_routes = Router::new()
        .route("/chat/groups/{user_id}", routing::get(groups::list_groups))
        .route("/chat/group", routing::post(groups::create_group))
        .route(
            "/chat/group/{group_id}/add/{user_id}",
            routing::put(groups::add_member),
        )
        .route(
            "/chat/group/{group_id}/remove/{user_id}",
            routing::put(groups::remove_member),
        )
        .route(
            "/chat/group/message",
            routing::post(groups::send_group_message),
        )
        .route(
            "/chat/group/message/{id}",
            routing::put(groups::update_group_message).delete(groups::delete_group_message),
        )
        .route(
            "/chat/group/{group_id}/{user_id}",
            routing::get(groups::get_group_messages),
        );

    let ws_routes = Router::new().route("/ws", routing::get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", routing::get(health_check));

    Router::new()
        .merge(contact_routes)
        .merge(message_routes)
        .merge(group_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
