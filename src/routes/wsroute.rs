//! WebSocket endpoint. Each connection registers as a session for the
//! authenticated user; events addressed to that user are pushed down the
//! socket. The client sends small JSON commands upstream (typing and read
//! signals); everything else rides the HTTP API.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    TypingStart { conversation_id: Uuid },
    TypingStop { conversation_id: Uuid },
    MarkRead { conversation_id: Uuid },
}

pub async fn ws_handler(
    State(state): State<AppState>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user.id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let mut rx = state.registry.subscribe(user_id).await;
    let (mut sink, mut stream) = socket.split();
    tracing::debug!(%user_id, "websocket session opened");

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let command: ClientCommand = match serde_json::from_str(&text) {
                Ok(command) => command,
                Err(_) => {
                    tracing::debug!(%user_id, "ignoring malformed client command");
                    continue;
                }
            };
            let result = match command {
                ClientCommand::TypingStart { conversation_id } => {
                    recv_state.chat.typing_start(user_id, conversation_id).await
                }
                ClientCommand::TypingStop { conversation_id } => {
                    recv_state.chat.typing_stop(user_id, conversation_id).await
                }
                ClientCommand::MarkRead { conversation_id } => {
                    recv_state
                        .chat
                        .mark_conversation_read(user_id, conversation_id)
                        .await
                }
            };
            if let Err(err) = result {
                tracing::debug!(%user_id, %err, "client command rejected");
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::debug!(%user_id, "websocket session closed");
}
