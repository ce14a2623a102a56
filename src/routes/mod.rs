use axum::routing::{delete, get, post, put};
use axum::{middleware, Json, Router};
use serde_json::json;

use crate::state::AppState;

pub mod conversations;
pub mod groups;
pub mod messages;
pub mod reactions;
pub mod wsroute;

use conversations::{
    close_conversation, get_conversation, list_conversations, mark_read, open_direct, unread_total,
};
use groups::{add_members, create_group, remove_member, rename_group};
use messages::{
    delete_message, edit_message, get_messages, search_all_messages, search_messages, send_message,
};
use reactions::toggle_reaction;
use wsroute::ws_handler;

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "chat-service" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/conversations", get(list_conversations))
        .route("/conversations/direct", post(open_direct))
        .route("/conversations/unread_total", get(unread_total))
        .route(
            "/conversations/:id",
            get(get_conversation).delete(close_conversation),
        )
        .route("/conversations/:id/read", post(mark_read))
        .route(
            "/conversations/:id/messages",
            get(get_messages).post(send_message),
        )
        .route("/conversations/:id/messages/search", get(search_messages))
        .route("/messages/search", get(search_all_messages))
        .route("/messages/:id", put(edit_message).delete(delete_message))
        .route("/messages/:id/reactions", post(toggle_reaction))
        .route("/groups", post(create_group))
        .route("/groups/:id/title", put(rename_group))
        .route("/groups/:id/members", post(add_members))
        .route("/groups/:id/members/:member_id", delete(remove_member))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn(crate::middleware::auth::auth_middleware))
        .with_state(state)
}
