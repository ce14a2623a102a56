use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dotenvy::dotenv;
use rand::rngs::OsRng;
use rand::RngCore;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub message_key: [u8; 32],
    /// True when no usable MESSAGE_ENCRYPTION_KEY was configured and an
    /// ephemeral key was generated instead. Messages encrypted under an
    /// ephemeral key become undecodable after a restart.
    pub ephemeral_key: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let (message_key, ephemeral_key) = Self::load_message_key();

        Ok(Self {
            database_url,
            redis_url,
            port,
            message_key,
            ephemeral_key,
        })
    }

    /// Reads the base64 32-byte master key from MESSAGE_ENCRYPTION_KEY.
    /// A missing or malformed key falls back to a freshly generated one so
    /// the service still starts; the warning makes the hazard visible
    /// instead of papering over it.
    fn load_message_key() -> ([u8; 32], bool) {
        match env::var("MESSAGE_ENCRYPTION_KEY") {
            Ok(b64) => match STANDARD.decode(b64.trim()) {
                Ok(bytes) if bytes.len() == 32 => {
                    let mut key = [0u8; 32];
                    key.copy_from_slice(&bytes);
                    (key, false)
                }
                _ => {
                    tracing::warn!(
                        "MESSAGE_ENCRYPTION_KEY is not valid base64 for 32 bytes; \
                         generated an ephemeral key, stored messages will not \
                         decrypt across restarts"
                    );
                    (Self::generate_key(), true)
                }
            },
            Err(_) => {
                tracing::warn!(
                    "MESSAGE_ENCRYPTION_KEY not set; generated an ephemeral key, \
                     stored messages will not decrypt across restarts"
                );
                (Self::generate_key(), true)
            }
        }
    }

    fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/chat_test".into(),
            redis_url: "redis://127.0.0.1:6379/0".into(),
            port: 3000,
            message_key: [7u8; 32],
            ephemeral_key: false,
        }
    }
}
