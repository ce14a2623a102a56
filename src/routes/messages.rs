use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::models::message::MessageType;
use crate::services::chat::{MessageView, SendMessage};
use crate::state::AppState;
use crate::storage::PageQuery;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    pub attachment_id: Option<Uuid>,
    pub reply_to: Option<Uuid>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

#[derive(Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub before: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<i64>,
}

impl SearchParams {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<MessageView>, AppError> {
    let view = state
        .chat
        .send_message(
            user.id,
            SendMessage {
                conversation_id,
                content: body.content,
                message_type: body.message_type,
                attachment_id: body.attachment_id,
                reply_to: body.reply_to,
            },
        )
        .await?;
    Ok(Json(view))
}

pub async fn get_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let query = PageQuery {
        limit: params.limit.unwrap_or(50).clamp(1, 100),
        before: params.before,
    };
    let views = state
        .chat
        .page_messages(user.id, conversation_id, query)
        .await?;
    Ok(Json(views))
}

pub async fn search_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let views = state
        .chat
        .search_messages(user.id, conversation_id, &params.q, params.limit())
        .await?;
    Ok(Json(views))
}

pub async fn search_all_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let views = state
        .chat
        .search_all_messages(user.id, &params.q, params.limit())
        .await?;
    Ok(Json(views))
}

pub async fn edit_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<Uuid>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<MessageView>, AppError> {
    let view = state
        .chat
        .edit_message(user.id, message_id, &body.content)
        .await?;
    Ok(Json(view))
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.chat.delete_message(user.id, message_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
