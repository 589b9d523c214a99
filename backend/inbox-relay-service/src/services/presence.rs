use crate::bus::EventBus;
use crate::error::{RelayError, RelayResult};
use crate::metrics;
use crate::registry::{PresenceStatus, SocketRegistry};
use crate::websocket::{ConnectionId, UserId};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Routing key of presence-changed events
pub const PRESENCE_ROUTING_KEY: &str = "presence.update";

/// What a disconnect cleanup ended up doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisconnectOutcome {
    pub removed: bool,
    pub went_offline: bool,
    pub published: bool,
}

/// Coordinates registry mutations with presence-changed events.
///
/// Every sequence mutates the registry first, then reads the resulting
/// connection count, then decides whether to publish.
#[derive(Clone)]
pub struct PresenceCoordinator {
    registry: Arc<dyn SocketRegistry>,
    bus: Arc<dyn EventBus>,
    exchange: String,
}

impl PresenceCoordinator {
    pub fn new(
        registry: Arc<dyn SocketRegistry>,
        bus: Arc<dyn EventBus>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            bus,
            exchange: exchange.into(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SocketRegistry> {
        &self.registry
    }

    /// Record a joined connection and mark the user online.
    ///
    /// Publishes `online` only when this is the user's first connection. A
    /// failed publish is logged; the registry already reflects the join.
    pub async fn on_join(&self, user_id: &UserId, connection_id: &ConnectionId) -> RelayResult<()> {
        self.registry.add_connection(user_id, connection_id).await?;
        self.registry
            .set_status(user_id, PresenceStatus::Online)
            .await?;

        let count = self.registry.connection_count(user_id).await?;
        debug!(user_id = %user_id, connections = count, "connection joined");

        if count == 1 {
            if let Err(e) = self.publish(user_id, PresenceStatus::Online).await {
                warn!(user_id = %user_id, error = %e, "failed to publish online presence");
            }
        }
        Ok(())
    }

    /// Remove a closing connection from the registry.
    ///
    /// Each step runs even if an earlier one failed. The user goes offline
    /// only when the connection had joined and no connection is left.
    pub async fn on_disconnect(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        had_joined: bool,
    ) -> DisconnectOutcome {
        let mut outcome = DisconnectOutcome::default();

        match self.registry.remove_connection(user_id, connection_id).await {
            Ok(()) => outcome.removed = true,
            Err(e) => warn!(
                user_id = %user_id,
                connection_id = %connection_id,
                error = %e,
                "failed to remove connection from registry"
            ),
        }

        if !had_joined {
            return outcome;
        }

        let remaining = match self.registry.connection_count(user_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "failed to read remaining connections");
                return outcome;
            }
        };

        if remaining > 0 {
            debug!(user_id = %user_id, remaining, "user still connected elsewhere");
            return outcome;
        }

        outcome.went_offline = true;
        if let Err(e) = self
            .registry
            .set_status(user_id, PresenceStatus::Offline)
            .await
        {
            warn!(user_id = %user_id, error = %e, "failed to mark user offline");
        }

        match self.publish(user_id, PresenceStatus::Offline).await {
            Ok(()) => outcome.published = true,
            Err(e) => warn!(user_id = %user_id, error = %e, "failed to publish offline presence"),
        }

        info!(user_id = %user_id, "user went offline");
        outcome
    }

    /// Switch a connected user between online and away
    pub async fn set_presence(&self, user_id: &UserId, status: PresenceStatus) -> RelayResult<()> {
        if !status.is_present() {
            return Err(RelayError::validation(
                "status must be 'online' or 'away'",
            ));
        }

        self.registry.set_status(user_id, status).await?;
        self.publish(user_id, status).await
    }

    pub async fn get_presence(&self, user_id: &UserId) -> RelayResult<PresenceStatus> {
        self.registry.get_status(user_id).await
    }

    async fn publish(&self, user_id: &UserId, status: PresenceStatus) -> RelayResult<()> {
        let payload = json!({
            "userId": user_id.as_str(),
            "status": status.as_str(),
        });
        let result = self
            .bus
            .publish(&self.exchange, PRESENCE_ROUTING_KEY, &payload)
            .await;
        metrics::record_presence_publish(status.as_str(), result.is_ok());
        result
    }
}
