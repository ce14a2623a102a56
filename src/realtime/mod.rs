pub mod events;
pub mod pubsub;

use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

use events::ChatEvent;

/// Live WebSocket sessions keyed by user id. A user may hold several
/// sessions (multiple tabs or devices); every session receives every event
/// addressed to the user. Dead senders are dropped on the next publish.
#[derive(Default, Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Vec<UnboundedSender<Message>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, user_id: Uuid) -> UnboundedReceiver<Message> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        guard.entry(user_id).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, user_id: Uuid, msg: Message) {
        let mut guard = self.inner.write().await;
        if let Some(sessions) = guard.get_mut(&user_id) {
            sessions.retain(|tx| tx.send(msg.clone()).is_ok());
            if sessions.is_empty() {
                guard.remove(&user_id);
            }
        }
    }

    pub async fn session_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map_or(0, |s| s.len())
    }
}

/// Fan-out front end used by the chat service. With Redis configured,
/// events go through pub/sub so every service instance delivers to its own
/// local sessions; without it, delivery is local only. Delivery is best
/// effort: failures are logged, never surfaced to the caller.
#[derive(Clone)]
pub struct EventBus {
    registry: SessionRegistry,
    redis: Option<redis::Client>,
}

impl EventBus {
    pub fn new(registry: SessionRegistry, redis: Option<redis::Client>) -> Self {
        Self { registry, redis }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn send_to_user(&self, user_id: Uuid, event: &ChatEvent) {
        let payload = match event.to_payload_string() {
            Ok(p) => p,
            Err(err) => {
                tracing::error!(%err, event = event.event_type(), "event serialization failed");
                return;
            }
        };

        if let Some(client) = &self.redis {
            match pubsub::publish(client, user_id, &payload).await {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!(%err, %user_id, "redis publish failed, delivering locally");
                }
            }
        }
        self.registry.publish(user_id, Message::Text(payload)).await;
    }

    pub async fn send_to_users(&self, user_ids: &[Uuid], event: &ChatEvent) {
        for user_id in user_ids {
            self.send_to_user(*user_id, event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_session_of_a_user() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let mut rx1 = registry.subscribe(user).await;
        let mut rx2 = registry.subscribe(user).await;

        registry.publish(user, Message::Text("hello".into())).await;
        assert_eq!(rx1.recv().await, Some(Message::Text("hello".into())));
        assert_eq!(rx2.recv().await, Some(Message::Text("hello".into())));
    }

    #[tokio::test]
    async fn dropped_sessions_are_pruned() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let rx = registry.subscribe(user).await;
        drop(rx);

        registry.publish(user, Message::Text("x".into())).await;
        assert_eq!(registry.session_count(user).await, 0);
    }

    #[tokio::test]
    async fn publish_to_unknown_user_is_a_noop() {
        let registry = SessionRegistry::new();
        registry
            .publish(Uuid::new_v4(), Message::Text("x".into()))
            .await;
    }
}
