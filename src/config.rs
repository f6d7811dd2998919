use dotenvy::dotenv;
use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,

    /// HS256 secret shared with the identity service that issues tokens.
    pub jwt_secret: String,

    /// Key guarding the internal publish endpoint. When unset the endpoint
    /// is disabled and producers must go through the library entry point.
    pub publish_api_key: Option<String>,

    /// Bound of each connection's outbound delivery queue.
    pub delivery_queue_capacity: usize,

    /// Typing indicators expire this many seconds after the last refresh.
    pub typing_ttl_secs: u64,

    /// Interval between server-initiated keepalive pings on chat sockets.
    pub ws_ping_interval_secs: u64,

    /// A chat socket with no inbound traffic for this long is force-closed.
    pub ws_idle_timeout_secs: u64,

    /// SSE streams emit a ping after this long without a notification.
    pub sse_keepalive_secs: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;

        Ok(Config {
            database_url,
            jwt_secret,
            port: env_parse("PORT", 8000),
            db_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            publish_api_key: env::var("PUBLISH_API_KEY").ok().filter(|s| !s.is_empty()),
            delivery_queue_capacity: env_parse("DELIVERY_QUEUE_CAPACITY", 256),
            typing_ttl_secs: env_parse("TYPING_TTL_SECS", 5),
            ws_ping_interval_secs: env_parse("WS_PING_INTERVAL_SECS", 30),
            ws_idle_timeout_secs: env_parse("WS_IDLE_TIMEOUT_SECS", 90),
            sse_keepalive_secs: env_parse("SSE_KEEPALIVE_SECS", 30),
        })
    }

    /// Fixed defaults for test harnesses that never read the environment.
    pub fn for_tests() -> Self {
        Config {
            database_url: String::new(),
            port: 0,
            db_max_connections: 1,
            jwt_secret: "test-secret".into(),
            publish_api_key: None,
            delivery_queue_capacity: 8,
            typing_ttl_secs: 5,
            ws_ping_interval_secs: 30,
            ws_idle_timeout_secs: 90,
            sse_keepalive_secs: 30,
        }
    }
}
