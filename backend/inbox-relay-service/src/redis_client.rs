use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Upper bound for a single Redis round trip
const REDIS_OP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct RedisClient {
    manager: SharedConnectionManager,
}

impl RedisClient {
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self { manager }
    }

    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        tracing::info!("Successfully connected to Redis");
        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    /// Clone of the underlying multiplexed connection
    pub async fn connection(&self) -> ConnectionManager {
        let guard = self.manager.lock().await;
        guard.clone()
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.connection().await;
        with_timeout(async move { redis::cmd("PING").query_async::<_, ()>(&mut conn).await })
            .await
    }
}

/// Run a Redis future with the default operation timeout
pub async fn with_timeout<T, F>(fut: F) -> RedisResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(REDIS_OP_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "redis operation timed out",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let ok: RedisResult<u8> = with_timeout(async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: RedisResult<()> = with_timeout(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), redis::ErrorKind::IoError);
    }
}
