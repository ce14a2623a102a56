use std::sync::Arc;

use chat_service::services::attachments::PgAttachmentService;
use chat_service::services::chat::ChatService;
use chat_service::services::codec::MessageCodec;
use chat_service::services::identity::{CachedUserDirectory, PgUserDirectory};
use chat_service::storage::postgres::{PgConversationStore, PgMessageStore};
use chat_service::{config, db, error, logging, realtime, routes, state::AppState};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
    db::run_migrations(&db)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    let registry = realtime::SessionRegistry::new();
    let redis = match redis::Client::open(cfg.redis_url.as_str()) {
        Ok(client) => {
            realtime::pubsub::spawn_listener(client.clone(), registry.clone());
            Some(client)
        }
        Err(err) => {
            tracing::warn!(%err, "redis unavailable, realtime fan-out is local only");
            None
        }
    };
    let events = realtime::EventBus::new(registry.clone(), redis);

    let codec = Arc::new(MessageCodec::new(&cfg.message_key));
    if cfg.ephemeral_key {
        tracing::warn!("running with an ephemeral message key");
    }

    let directory = Arc::new(CachedUserDirectory::new(Arc::new(PgUserDirectory::new(
        db.clone(),
    ))));
    let chat = Arc::new(ChatService::new(
        Arc::new(PgConversationStore::new(db.clone())),
        Arc::new(PgMessageStore::new(db.clone(), codec.clone())),
        codec,
        directory,
        Arc::new(PgAttachmentService::new(db.clone())),
        events,
    ));

    let app = routes::router(AppState {
        chat,
        registry,
        config: cfg.clone(),
    });

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| error::AppError::StartServer(format!("bind {addr}: {e}")))?;
    tracing::info!(%addr, "chat-service listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(format!("serve: {e}")))?;
    Ok(())
}
