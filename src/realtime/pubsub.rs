//! Redis pub/sub bridge. Events are published to per-user channels so any
//! service instance holding a session for that user relays them.

use axum::extract::ws::Message;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::Client;
use uuid::Uuid;

use super::SessionRegistry;

const CHANNEL_PREFIX: &str = "chat:user:";

fn channel_for_user(user_id: Uuid) -> String {
    format!("{CHANNEL_PREFIX}{user_id}")
}

pub async fn publish(client: &Client, user_id: Uuid, payload: &str) -> redis::RedisResult<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.publish::<_, _, ()>(channel_for_user(user_id), payload)
        .await
}

/// Subscribes to all per-user channels and forwards payloads to local
/// sessions. Runs until the Redis connection drops; the caller respawns it.
pub async fn start_listener(client: Client, registry: SessionRegistry) -> redis::RedisResult<()> {
    // pub/sub needs a dedicated connection, not the multiplexed one
    let conn = client.get_async_pubsub().await?;
    let mut pubsub = conn;
    pubsub.psubscribe(format!("{CHANNEL_PREFIX}*")).await?;
    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let channel: String = msg.get_channel_name().into();
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(%err, %channel, "unreadable pub/sub payload");
                continue;
            }
        };
        if let Some(raw_id) = channel.strip_prefix(CHANNEL_PREFIX) {
            match Uuid::parse_str(raw_id) {
                Ok(user_id) => registry.publish(user_id, Message::Text(payload)).await,
                Err(_) => tracing::warn!(%channel, "pub/sub channel with malformed user id"),
            }
        }
    }
    Ok(())
}

/// Keeps the listener alive across Redis hiccups with a short backoff.
pub fn spawn_listener(client: Client, registry: SessionRegistry) {
    tokio::spawn(async move {
        loop {
            if let Err(err) = start_listener(client.clone(), registry.clone()).await {
                tracing::error!(%err, "pub/sub listener exited, reconnecting");
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    });
}
