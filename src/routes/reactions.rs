use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::services::chat::MessageView;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

/// One endpoint handles add and remove: reacting twice with the same emoji
/// removes it.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<Uuid>,
    Json(body): Json<ToggleReactionRequest>,
) -> Result<Json<MessageView>, AppError> {
    let view = state
        .chat
        .toggle_reaction(user.id, message_id, &body.emoji)
        .await?;
    Ok(Json(view))
}
