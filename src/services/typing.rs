use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const AUTO_STOP_AFTER: Duration = Duration::from_secs(5);

/// Transient typing state keyed by (conversation, user). A typing signal
/// that is not refreshed expires after five seconds and fires the caller's
/// stop callback so peers are not left with a stale indicator.
#[derive(Clone, Default)]
pub struct TypingTracker {
    // generation counter per key detects whether a timer is stale
    entries: Arc<Mutex<HashMap<(Uuid, Uuid), u64>>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `user_id` is typing in `conversation_id`. Returns true
    /// when this is a fresh start (the caller should broadcast), false when
    /// it only refreshed an active indicator. `on_auto_stop` runs if five
    /// seconds pass without another start or an explicit stop.
    pub fn start<F>(&self, conversation_id: Uuid, user_id: Uuid, on_auto_stop: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let key = (conversation_id, user_id);
        let generation = {
            let mut entries = self.entries.lock().unwrap();
            let slot = entries.entry(key).or_insert(0);
            *slot += 1;
            *slot
        };
        let was_fresh = generation == 1;

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            tokio::time::sleep(AUTO_STOP_AFTER).await;
            let expired = {
                let mut entries = entries.lock().unwrap();
                match entries.get(&key) {
                    Some(&current) if current == generation => {
                        entries.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if expired {
                on_auto_stop();
            }
        });

        was_fresh
    }

    /// Explicit stop. Returns true when the user was actually typing so the
    /// caller knows whether to broadcast.
    pub fn stop(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.entries
            .lock()
            .unwrap()
            .remove(&(conversation_id, user_id))
            .is_some()
    }

    pub fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.entries
            .lock()
            .unwrap()
            .contains_key(&(conversation_id, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn start_is_fresh_once_until_stopped() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();

        assert!(tracker.start(conv, user, || {}));
        assert!(!tracker.start(conv, user, || {}));
        assert!(tracker.is_typing(conv, user));

        assert!(tracker.stop(conv, user));
        assert!(!tracker.stop(conv, user));
        assert!(tracker.start(conv, user, || {}));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_stop_fires_after_timeout() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        tracker.start(conv, user, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        // let the spawned timer task register its sleep before advancing
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_typing(conv, user));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_postpones_auto_stop() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        tracker.start(conv, user, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        // let the spawned timer task register its sleep before advancing
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(3)).await;

        let f = Arc::clone(&fired);
        tracker.start(conv, user, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        // first timer is stale, second has not fired yet
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(tracker.is_typing(conv, user));

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_auto_stop() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        tracker.start(conv, user, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tracker.stop(conv, user);

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
