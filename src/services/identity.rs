use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    AffiliateManager,
    Agent,
    LeadManager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::AffiliateManager => "affiliate_manager",
            Role::Agent => "agent",
            Role::LeadManager => "lead_manager",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "affiliate_manager" => Some(Role::AffiliateManager),
            "agent" => Some(Role::Agent),
            "lead_manager" => Some(Role::LeadManager),
            _ => None,
        }
    }

    /// Role-pair capability matrix for opening direct conversations.
    /// Same role always may; admins and lead managers may message anyone;
    /// affiliate managers and agents may message each other.
    pub fn can_message(self, other: Role) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Role::Admin, _) | (_, Role::Admin) => true,
            (Role::LeadManager, _) | (_, Role::LeadManager) => true,
            (Role::AffiliateManager, Role::Agent) | (Role::Agent, Role::AffiliateManager) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub full_name: String,
    pub role: Role,
}

/// Read-only view of the user directory owned by the identity service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError>;
}

pub struct PgUserDirectory {
    db: Pool<Postgres>,
}

impl PgUserDirectory {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError> {
        let row = sqlx::query("SELECT id, full_name, role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.and_then(|row| {
            let role: String = row.get("role");
            Role::parse(&role).map(|role| UserProfile {
                id: row.get("id"),
                full_name: row.get("full_name"),
                role,
            })
        }))
    }
}

const CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedProfile {
    profile: Option<UserProfile>,
    fetched_at: Instant,
}

/// Wraps a `UserDirectory` with a 60 second TTL cache so hot paths
/// (authorization checks, mention hydration) do not hit the directory on
/// every message. Negative lookups are cached too.
pub struct CachedUserDirectory {
    inner: Arc<dyn UserDirectory>,
    entries: RwLock<HashMap<Uuid, CachedProfile>>,
}

impl CachedUserDirectory {
    pub fn new(inner: Arc<dyn UserDirectory>) -> Self {
        Self {
            inner,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn invalidate(&self, user_id: Uuid) {
        self.entries.write().await.remove(&user_id);
    }
}

#[async_trait]
impl UserDirectory for CachedUserDirectory {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&user_id) {
                if entry.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(entry.profile.clone());
                }
            }
        }

        let profile = self.inner.get_user(user_id).await?;
        self.entries.write().await.insert(
            user_id,
            CachedProfile {
                profile: profile.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn capability_matrix() {
        use Role::*;
        for role in [Admin, AffiliateManager, Agent, LeadManager] {
            assert!(role.can_message(role));
            assert!(Admin.can_message(role));
            assert!(role.can_message(Admin));
            assert!(LeadManager.can_message(role));
            assert!(role.can_message(LeadManager));
        }
        assert!(AffiliateManager.can_message(Agent));
        assert!(Agent.can_message(AffiliateManager));
    }

    struct CountingDirectory {
        calls: AtomicUsize,
        user: UserProfile,
    }

    #[async_trait]
    impl UserDirectory for CountingDirectory {
        async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((user_id == self.user.id).then(|| self.user.clone()))
        }
    }

    #[tokio::test]
    async fn cache_serves_repeat_lookups() {
        let user = UserProfile {
            id: Uuid::new_v4(),
            full_name: "Test User".into(),
            role: Role::Agent,
        };
        let inner = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            user: user.clone(),
        });
        let cached = CachedUserDirectory::new(inner.clone());

        for _ in 0..3 {
            let got = cached.get_user(user.id).await.unwrap().unwrap();
            assert_eq!(got.id, user.id);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // misses are cached as well
        let missing = Uuid::new_v4();
        assert!(cached.get_user(missing).await.unwrap().is_none());
        assert!(cached.get_user(missing).await.unwrap().is_none());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        cached.invalidate(user.id).await;
        cached.get_user(user.id).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
