//! Test doubles for the relay
//!
//! In-memory stand-ins for the socket registry, the event bus and the unread
//! count service, plus helpers for minting HS256 test credentials. Redis-backed
//! tests use [`get_test_redis_client`] and skip when Redis is not reachable.

use crate::auth::{Claims, Handshake, JwtVerifier};
use crate::bus::{BusEvent, EventBus, SubscriptionTable};
use crate::config::{
    AppConfig, Config, JwtConfig, KafkaConfig, QueueMode, RedisConfig, UnreadConfig,
    WebSocketConfig,
};
use crate::error::{RelayError, RelayResult};
use crate::redis_client::{with_timeout, RedisClient};
use crate::registry::{PresenceStatus, SocketRegistry};
use crate::services::{FanoutRouter, PresenceCoordinator, SessionManager, UnreadCountProvider};
use crate::state::AppState;
use crate::websocket::{ConnectionId, ConnectionManager, UserId};
use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_SECRET: &str = "inbox-relay-test-secret";
pub const NOTIFICATIONS_EXCHANGE: &str = "clothme.notifications";

/// Sign any claim set with the test secret
pub fn mint_token_with_claims(claims: &impl Serialize) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("failed to sign test token")
}

/// Valid token for `user_id`, expiring in ten minutes
pub fn mint_token(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    mint_token_with_claims(&Claims {
        user_id: Some(user_id.to_string()),
        sub: None,
        exp: now + 600,
        iat: Some(now),
        iss: None,
    })
}

pub fn expired_token(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    mint_token_with_claims(&Claims {
        user_id: Some(user_id.to_string()),
        sub: None,
        exp: now - 60,
        iat: Some(now - 660),
        iss: None,
    })
}

/// Handshake carrying a valid bearer token for `user_id`
pub fn bearer(user_id: &str) -> Handshake {
    Handshake::with_bearer(mint_token(user_id))
}

#[derive(Default)]
struct RegistryState {
    sockets: HashMap<UserId, HashSet<ConnectionId>>,
    status: HashMap<UserId, PresenceStatus>,
}

/// Socket registry kept in process memory
#[derive(Default)]
pub struct InMemorySocketRegistry {
    state: Mutex<RegistryState>,
    failing: AtomicBool,
}

impl InMemorySocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `UpstreamUnavailable`
    pub fn fail_calls(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Raw stored status, without the no-sockets correction
    pub fn stored_status(&self, user_id: &UserId) -> Option<PresenceStatus> {
        self.state
            .lock()
            .expect("registry lock poisoned")
            .status
            .get(user_id)
            .copied()
    }

    fn check(&self) -> RelayResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelayError::upstream("registry unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SocketRegistry for InMemorySocketRegistry {
    async fn add_connection(&self, user_id: &UserId, connection_id: &ConnectionId) -> RelayResult<()> {
        self.check()?;
        let mut state = self.state.lock().expect("registry lock poisoned");
        state
            .sockets
            .entry(user_id.clone())
            .or_default()
            .insert(connection_id.clone());
        Ok(())
    }

    async fn remove_connection(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> RelayResult<()> {
        self.check()?;
        let mut state = self.state.lock().expect("registry lock poisoned");
        if let Some(set) = state.sockets.get_mut(user_id) {
            set.remove(connection_id);
        }
        Ok(())
    }

    async fn list_connections(&self, user_id: &UserId) -> RelayResult<Vec<ConnectionId>> {
        self.check()?;
        let state = self.state.lock().expect("registry lock poisoned");
        Ok(state
            .sockets
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn connection_count(&self, user_id: &UserId) -> RelayResult<usize> {
        self.check()?;
        let state = self.state.lock().expect("registry lock poisoned");
        Ok(state.sockets.get(user_id).map(HashSet::len).unwrap_or(0))
    }

    async fn set_status(&self, user_id: &UserId, status: PresenceStatus) -> RelayResult<()> {
        self.check()?;
        let mut state = self.state.lock().expect("registry lock poisoned");
        state.status.insert(user_id.clone(), status);
        Ok(())
    }

    async fn get_status(&self, user_id: &UserId) -> RelayResult<PresenceStatus> {
        self.check()?;
        let state = self.state.lock().expect("registry lock poisoned");
        let status = state
            .status
            .get(user_id)
            .copied()
            .unwrap_or(PresenceStatus::Offline);
        let sockets = state.sockets.get(user_id).map(HashSet::len).unwrap_or(0);
        if status.is_present() && sockets == 0 {
            return Ok(PresenceStatus::Offline);
        }
        Ok(status)
    }
}

/// Event bus that records every publish
#[derive(Default)]
pub struct RecordingEventBus {
    published: Mutex<Vec<BusEvent>>,
    failing: AtomicBool,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<BusEvent> {
        self.published.lock().expect("bus lock poisoned").clone()
    }

    pub fn published_with_key(&self, routing_key: &str) -> Vec<BusEvent> {
        self.published()
            .into_iter()
            .filter(|e| e.routing_key == routing_key)
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().expect("bus lock poisoned").clear();
    }

    /// Hand every recorded event to a subscription table, as the broker would,
    /// and forget them. Returns the number of queue deliveries.
    pub async fn deliver(&self, table: &SubscriptionTable) -> usize {
        let events: Vec<BusEvent> = self.published.lock().expect("bus lock poisoned").drain(..).collect();
        let mut delivered = 0;
        for event in &events {
            delivered += table.dispatch(event).await;
        }
        delivered
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &Value) -> RelayResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelayError::upstream("bus unavailable"));
        }
        self.published
            .lock()
            .expect("bus lock poisoned")
            .push(BusEvent::new(exchange, routing_key, payload.clone()));
        Ok(())
    }
}

/// Unread count provider returning a constant
pub struct FixedUnreadCountProvider(pub u64);

#[async_trait]
impl UnreadCountProvider for FixedUnreadCountProvider {
    async fn unread_count(&self, _user_id: &UserId) -> RelayResult<u64> {
        Ok(self.0)
    }
}

pub fn test_config() -> Config {
    Config {
        app: AppConfig {
            env: "test".to_string(),
            port: 0,
            instance_id: "relay-test".to_string(),
            frontend_url: "*".to_string(),
        },
        redis: RedisConfig {
            url: test_redis_url(),
            presence_ttl_secs: 86_400,
        },
        kafka: KafkaConfig {
            brokers: "localhost:9092".to_string(),
            client_id: "inbox-relay-test".to_string(),
            events_exchange: "clothme.events".to_string(),
            notifications_exchange: NOTIFICATIONS_EXCHANGE.to_string(),
            queue_mode: QueueMode::Fanout,
            topic_partitions: 1,
            replication_factor: 1,
            publish_timeout_ms: 1_000,
        },
        jwt: JwtConfig {
            secret: Some(TEST_SECRET.to_string()),
            public_key_pem: None,
            issuer: None,
        },
        websocket: WebSocketConfig::default(),
        unread: UnreadConfig {
            service_url: None,
            timeout_ms: 500,
        },
    }
}

/// Fully wired relay backed by in-memory doubles
pub struct TestHarness {
    pub registry: Arc<InMemorySocketRegistry>,
    pub bus: Arc<RecordingEventBus>,
    pub connections: ConnectionManager,
    pub sessions: SessionManager,
    pub router: Arc<FanoutRouter>,
    pub subscriptions: SubscriptionTable,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_unread(Arc::new(FixedUnreadCountProvider(0)))
    }

    pub fn with_unread(unread: Arc<dyn UnreadCountProvider>) -> Self {
        let registry = Arc::new(InMemorySocketRegistry::new());
        let bus = Arc::new(RecordingEventBus::new());
        let connections = ConnectionManager::new();

        let presence = PresenceCoordinator::new(registry.clone(), bus.clone(), NOTIFICATIONS_EXCHANGE);
        let sessions = SessionManager::new(
            connections.clone(),
            Arc::new(JwtVerifier::from_secret(TEST_SECRET)),
            presence,
            bus.clone(),
            unread,
            NOTIFICATIONS_EXCHANGE,
        );
        let router = Arc::new(FanoutRouter::new(connections.clone()));
        let subscriptions = router.subscription_table(NOTIFICATIONS_EXCHANGE);

        Self {
            registry,
            bus,
            connections,
            sessions,
            router,
            subscriptions,
        }
    }

    /// Route everything published so far back through the fan-out bindings
    pub async fn pump_bus(&self) -> usize {
        self.bus.deliver(&self.subscriptions).await
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.sessions.clone(), Arc::new(test_config()))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn test_redis_url() -> String {
    env::var("REDIS_TEST_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Redis client for integration tests.
///
/// Uses REDIS_TEST_URL or defaults to localhost; callers should skip when this fails.
pub async fn get_test_redis_client() -> RelayResult<RedisClient> {
    let client = RedisClient::from_url(&test_redis_url()).await?;
    with_timeout(async { client.ping().await }).await?;
    Ok(client)
}

pub async fn is_redis_available() -> bool {
    get_test_redis_client().await.is_ok()
}
