use super::{presence_key, sockets_key, PresenceStatus, SocketRegistry};
use crate::error::RelayResult;
use crate::redis_client::{with_timeout, RedisClient};
use crate::websocket::{ConnectionId, UserId};
use async_trait::async_trait;
use redis::AsyncCommands;

/// Socket registry stored in Redis.
///
/// Every mutation is a single command or a MULTI/EXEC pipeline, so concurrent
/// relay instances never interleave half-applied updates for the same key.
#[derive(Clone)]
pub struct RedisSocketRegistry {
    redis: RedisClient,
    ttl_secs: u64,
}

impl RedisSocketRegistry {
    pub fn new(redis: RedisClient, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }
}

#[async_trait]
impl SocketRegistry for RedisSocketRegistry {
    async fn add_connection(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> RelayResult<()> {
        let key = sockets_key(user_id);
        let mut conn = self.redis.connection().await;

        with_timeout(async {
            redis::pipe()
                .atomic()
                .sadd(&key, connection_id.as_str())
                .ignore()
                .expire(&key, self.ttl_secs as i64)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;

        tracing::debug!(user_id = %user_id, connection_id = %connection_id, "socket added to registry");
        Ok(())
    }

    async fn remove_connection(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> RelayResult<()> {
        let key = sockets_key(user_id);
        let mut conn = self.redis.connection().await;

        let removed: usize =
            with_timeout(async { conn.srem(&key, connection_id.as_str()).await }).await?;

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            removed,
            "socket removed from registry"
        );
        Ok(())
    }

    async fn list_connections(&self, user_id: &UserId) -> RelayResult<Vec<ConnectionId>> {
        let key = sockets_key(user_id);
        let mut conn = self.redis.connection().await;

        let members: Vec<String> = with_timeout(async { conn.smembers(&key).await }).await?;
        Ok(members.into_iter().map(ConnectionId::new).collect())
    }

    async fn connection_count(&self, user_id: &UserId) -> RelayResult<usize> {
        let key = sockets_key(user_id);
        let mut conn = self.redis.connection().await;

        let count: usize = with_timeout(async { conn.scard(&key).await }).await?;
        Ok(count)
    }

    async fn set_status(&self, user_id: &UserId, status: PresenceStatus) -> RelayResult<()> {
        let key = presence_key(user_id);
        let mut conn = self.redis.connection().await;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(status.as_str());
        // Offline is stored without expiry; present states must be refreshed
        if status.is_present() {
            cmd.arg("EX").arg(self.ttl_secs);
        }

        with_timeout(async { cmd.query_async::<_, ()>(&mut conn).await }).await?;
        Ok(())
    }

    async fn get_status(&self, user_id: &UserId) -> RelayResult<PresenceStatus> {
        let mut conn = self.redis.connection().await;

        let (raw, sockets): (Option<String>, usize) = with_timeout(async {
            redis::pipe()
                .get(presence_key(user_id))
                .scard(sockets_key(user_id))
                .query_async(&mut conn)
                .await
        })
        .await?;

        let status = raw
            .as_deref()
            .and_then(|s| s.parse::<PresenceStatus>().ok())
            .unwrap_or(PresenceStatus::Offline);

        // A present status without any socket is a leftover from a crashed instance
        if status.is_present() && sockets == 0 {
            return Ok(PresenceStatus::Offline);
        }
        Ok(status)
    }
}
