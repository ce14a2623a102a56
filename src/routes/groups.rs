use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::models::conversation::ConversationContext;
use crate::services::chat::ConversationView;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub title: String,
    pub member_ids: Vec<Uuid>,
    #[serde(default)]
    pub context: Option<ConversationContext>,
}

#[derive(Deserialize)]
pub struct RenameGroupRequest {
    pub title: String,
}

#[derive(Deserialize)]
pub struct AddMembersRequest {
    pub member_ids: Vec<Uuid>,
}

pub async fn create_group(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateGroupRequest>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state
        .chat
        .create_group(
            user.id,
            &body.title,
            &body.member_ids,
            body.context.unwrap_or_default(),
        )
        .await?;
    Ok(Json(view))
}

pub async fn rename_group(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RenameGroupRequest>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state.chat.rename_group(user.id, id, &body.title).await?;
    Ok(Json(view))
}

pub async fn add_members(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<AddMembersRequest>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state
        .chat
        .add_group_participants(user.id, id, &body.member_ids)
        .await?;
    Ok(Json(view))
}

pub async fn remove_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state
        .chat
        .remove_group_participant(user.id, id, member_id)
        .await?;
    Ok(Json(view))
}
