use crate::error::RelayError;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub jwt: JwtConfig,
    pub websocket: WebSocketConfig,
    pub unread: UnreadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    /// Identifies this relay instance; used for per-instance consumer groups
    pub instance_id: String,
    /// Allowed CORS origin, `*` for any
    pub frontend_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// TTL for `presence:*` and `sockets:*` keys in seconds (default: 86400)
    pub presence_ttl_secs: u64,
}

/// How durable queues map onto Kafka consumer groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Every instance gets its own copy of each event (group id per instance)
    Fanout,
    /// Instances share one group and compete for events
    Shared,
}

impl FromStr for QueueMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fanout" => Ok(QueueMode::Fanout),
            "shared" | "competing" => Ok(QueueMode::Shared),
            other => Err(RelayError::Config(format!(
                "RELAY_QUEUE_MODE must be 'fanout' or 'shared', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub client_id: String,
    /// Provisioned but not consumed by the relay
    pub events_exchange: String,
    pub notifications_exchange: String,
    pub queue_mode: QueueMode,
    pub topic_partitions: i32,
    pub replication_factor: i32,
    pub publish_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 shared secret
    pub secret: Option<String>,
    /// RS256 public key in PEM format, takes precedence over `secret`
    pub public_key_pem: Option<String>,
    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub max_frame_size: usize,
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            client_timeout_secs: 30,
            max_frame_size: 256_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadConfig {
    /// Base URL of the service that owns unread counts; unset disables the feature
    pub service_url: Option<String>,
    pub timeout_ms: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, RelayError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RelayError::Config(format!("{} is invalid: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, RelayError> {
        dotenv().ok();

        let instance_id = non_empty("RELAY_INSTANCE_ID")
            .or_else(|| non_empty("HOSTNAME"))
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let jwt = JwtConfig {
            secret: non_empty("JWT_SECRET"),
            public_key_pem: non_empty("JWT_PUBLIC_KEY_PEM"),
            issuer: non_empty("JWT_ISSUER"),
        };
        if jwt.secret.is_none() && jwt.public_key_pem.is_none() {
            return Err(RelayError::Config(
                "JWT_SECRET or JWT_PUBLIC_KEY_PEM must be set".into(),
            ));
        }

        Ok(Config {
            app: AppConfig {
                env: env_or("APP_ENV", "development"),
                port: parse_env("PORT", 5050)?,
                instance_id,
                frontend_url: env_or("FRONTEND_URL", "*"),
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
                presence_ttl_secs: parse_env("PRESENCE_TTL_SECS", 86_400)?,
            },
            kafka: KafkaConfig {
                brokers: env_or("KAFKA_BROKERS", "localhost:9092"),
                client_id: env_or("KAFKA_CLIENT_ID", "inbox-relay-service"),
                events_exchange: env_or("EVENTS_EXCHANGE", "clothme.events"),
                notifications_exchange: env_or("NOTIFICATIONS_EXCHANGE", "clothme.notifications"),
                queue_mode: parse_env("RELAY_QUEUE_MODE", QueueMode::Fanout)?,
                topic_partitions: parse_env("KAFKA_TOPIC_PARTITIONS", 3)?,
                replication_factor: parse_env("KAFKA_REPLICATION_FACTOR", 1)?,
                publish_timeout_ms: parse_env("KAFKA_PUBLISH_TIMEOUT_MS", 5_000)?,
            },
            jwt,
            websocket: WebSocketConfig {
                heartbeat_interval_secs: parse_env("WS_HEARTBEAT_INTERVAL_SECS", 5)?,
                client_timeout_secs: parse_env("WS_CLIENT_TIMEOUT_SECS", 30)?,
                max_frame_size: parse_env("WS_MAX_FRAME_SIZE", 256_000)?,
            },
            unread: UnreadConfig {
                service_url: non_empty("UNREAD_COUNT_SERVICE_URL"),
                timeout_ms: parse_env("UNREAD_COUNT_TIMEOUT_MS", 2_000)?,
            },
        })
    }
}
