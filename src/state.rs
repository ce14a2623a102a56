use std::sync::Arc;

use crate::config::Config;
use crate::realtime::SessionRegistry;
use crate::services::chat::ChatService;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub registry: SessionRegistry,
    pub config: Arc<Config>,
}
