use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::models::conversation::{ConversationContext, ContextKind};
use crate::services::chat::ConversationView;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OpenDirectRequest {
    pub peer_id: Uuid,
    #[serde(default)]
    pub context: Option<ConversationContext>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub kind: Option<ContextKind>,
}

#[derive(Serialize)]
pub struct UnreadTotalResponse {
    pub total_unread: i64,
}

pub async fn open_direct(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<OpenDirectRequest>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state
        .chat
        .open_direct(user.id, body.peer_id, body.context.unwrap_or_default())
        .await?;
    Ok(Json(view))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ConversationView>>, AppError> {
    let views = state.chat.list_conversations(user.id, query.kind).await?;
    Ok(Json(views))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state.chat.get_conversation(user.id, id).await?;
    Ok(Json(view))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.chat.mark_conversation_read(user.id, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn close_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.chat.close_conversation(user.id, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn unread_total(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UnreadTotalResponse>, AppError> {
    let total_unread = state.chat.total_unread(user.id).await?;
    Ok(Json(UnreadTotalResponse { total_unread }))
}
