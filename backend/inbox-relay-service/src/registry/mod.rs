/// Socket registry
///
/// Shared, cross-instance record of which connection ids belong to which user
/// and of each user's coarse presence status. It is the single source of truth
/// for presence; callers must not cache its answers between operations.
///
/// Key layout:
/// - `presence:<userId>` -> status string (TTL while not offline)
/// - `sockets:<userId>`  -> set of connection ids (TTL refreshed on every add)
use crate::error::{RelayError, RelayResult};
use crate::websocket::{ConnectionId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod redis_store;

pub use redis_store::RedisSocketRegistry;

/// Default lifetime of registry entries (24 hours)
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        }
    }

    /// Online and away both count as present
    pub fn is_present(&self) -> bool {
        !matches!(self, PresenceStatus::Offline)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceStatus::Online),
            "away" => Ok(PresenceStatus::Away),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(RelayError::validation(format!(
                "unknown presence status '{}'",
                other
            ))),
        }
    }
}

pub fn presence_key(user_id: &UserId) -> String {
    format!("presence:{}", user_id)
}

pub fn sockets_key(user_id: &UserId) -> String {
    format!("sockets:{}", user_id)
}

/// Narrow interface to the shared key-value store.
///
/// Implementations must rely on the store's atomic per-key primitives; no
/// in-process copy of the mapping is allowed.
#[async_trait]
pub trait SocketRegistry: Send + Sync {
    /// Add a connection to the user's set and refresh the entry TTL
    async fn add_connection(&self, user_id: &UserId, connection_id: &ConnectionId)
        -> RelayResult<()>;

    async fn remove_connection(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> RelayResult<()>;

    async fn list_connections(&self, user_id: &UserId) -> RelayResult<Vec<ConnectionId>>;

    /// Current size of the user's connection set
    async fn connection_count(&self, user_id: &UserId) -> RelayResult<usize>;

    async fn set_status(&self, user_id: &UserId, status: PresenceStatus) -> RelayResult<()>;

    /// Status of the user; missing or expired entries read as offline
    async fn get_status(&self, user_id: &UserId) -> RelayResult<PresenceStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let user = UserId::new("42");
        assert_eq!(presence_key(&user), "presence:42");
        assert_eq!(sockets_key(&user), "sockets:42");
    }

    #[test]
    fn test_presence_status_round_trip_strings() {
        for status in [
            PresenceStatus::Online,
            PresenceStatus::Away,
            PresenceStatus::Offline,
        ] {
            assert_eq!(status.as_str().parse::<PresenceStatus>().unwrap(), status);
        }
        assert!("busy".parse::<PresenceStatus>().is_err());
    }

    #[test]
    fn test_presence_status_serde_lowercase() {
        let json = serde_json::to_string(&PresenceStatus::Away).unwrap();
        assert_eq!(json, "\"away\"");
        assert!(PresenceStatus::Away.is_present());
        assert!(!PresenceStatus::Offline.is_present());
    }
}
