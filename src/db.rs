use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

// Embed SQL migrations at compile time for deterministic startup
const MIG_0001: &str = include_str!("../migrations/0001_create_conversations.sql");
const MIG_0002: &str = include_str!("../migrations/0002_create_participants.sql");
const MIG_0003: &str = include_str!("../migrations/0003_create_messages.sql");
const MIG_0004: &str = include_str!("../migrations/0004_create_reads_reactions.sql");

pub async fn init_pool(database_url: &str) -> Result<Pool<Postgres>, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(db: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    // Run sequentially; each file may contain multiple statements and every
    // statement is written to be idempotent (IF NOT EXISTS).
    for (i, sql) in [MIG_0001, MIG_0002, MIG_0003, MIG_0004].into_iter().enumerate() {
        let label = i + 1;
        sqlx::raw_sql(sql).execute(db).await?;
        tracing::info!(migration = %label, "chat-service migration applied");
    }
    Ok(())
}
