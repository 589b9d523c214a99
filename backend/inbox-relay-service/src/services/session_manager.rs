use super::presence::{DisconnectOutcome, PresenceCoordinator};
use super::unread::UnreadCountProvider;
use crate::auth::{CredentialVerifier, Handshake};
use crate::bus::EventBus;
use crate::error::{RelayError, RelayResult};
use crate::metrics;
use crate::registry::PresenceStatus;
use crate::websocket::{
    AckResponse, ClientFrame, ClientRequest, ConnectionId, ConnectionManager, ServerMessage,
    UserId,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Routing key for client-originated notifications
pub const NOTIFICATION_ROUTING_KEY: &str = "inbox.notification";

/// Per-connection session state.
///
/// `user_id` is bound by the authorization gate; `joined` flips once the
/// connection has entered its user's room.
#[derive(Debug, Clone)]
struct Session {
    handshake: Handshake,
    user_id: Option<UserId>,
    joined: bool,
}

/// Drives the connection state machine `Connected -> JoinedRoom -> Closed`
#[derive(Clone)]
pub struct SessionManager {
    connections: ConnectionManager,
    verifier: Arc<dyn CredentialVerifier>,
    presence: PresenceCoordinator,
    bus: Arc<dyn EventBus>,
    unread: Arc<dyn UnreadCountProvider>,
    notifications_exchange: String,
    sessions: Arc<RwLock<HashMap<ConnectionId, Session>>>,
}

impl SessionManager {
    pub fn new(
        connections: ConnectionManager,
        verifier: Arc<dyn CredentialVerifier>,
        presence: PresenceCoordinator,
        bus: Arc<dyn EventBus>,
        unread: Arc<dyn UnreadCountProvider>,
        notifications_exchange: impl Into<String>,
    ) -> Self {
        Self {
            connections,
            verifier,
            presence,
            bus,
            unread,
            notifications_exchange: notifications_exchange.into(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Check a handshake before the transport upgrade.
    ///
    /// No credential is fine; a credential that fails verification is not.
    pub fn admit(&self, handshake: &Handshake) -> RelayResult<()> {
        if handshake.has_credential() {
            self.verifier.authenticate(handshake)?;
        }
        Ok(())
    }

    /// Register a new connection and queue its `connection_status` greeting
    pub async fn connect(
        &self,
        handshake: Handshake,
    ) -> RelayResult<(ConnectionId, mpsc::UnboundedReceiver<ServerMessage>)> {
        self.admit(&handshake)?;

        let connection_id = ConnectionId::generate();
        let rx = self.connections.register(connection_id.clone()).await;
        self.sessions.write().await.insert(
            connection_id.clone(),
            Session {
                handshake,
                user_id: None,
                joined: false,
            },
        );

        self.connections
            .send_to(
                &connection_id,
                ServerMessage::connected(connection_id.as_str()),
            )
            .await;

        metrics::connection_opened();
        info!(connection_id = %connection_id, "client connected");
        Ok((connection_id, rx))
    }

    /// Handle one raw text frame and build the reply
    pub async fn handle_text(&self, connection_id: &ConnectionId, text: &str) -> ServerMessage {
        match ClientFrame::from_json(text) {
            Ok(frame) => self.handle_frame(connection_id, &frame).await,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "unparseable frame");
                metrics::record_client_request("invalid", "error");
                ServerMessage::Ack {
                    event: "error".to_string(),
                    id: None,
                    response: AckResponse::error("Invalid message format", Some("validation".into())),
                }
            }
        }
    }

    pub async fn handle_frame(&self, connection_id: &ConnectionId, frame: &ClientFrame) -> ServerMessage {
        let result = self.gate_and_dispatch(connection_id, frame).await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    connection_id = %connection_id,
                    event = %frame.event,
                    error = %e,
                    "client request failed"
                );
                AckResponse::from_error(&e)
            }
        };

        metrics::record_client_request(&frame.event, &response.status);
        ServerMessage::ack(frame, response)
    }

    /// Gated events are authorized before their payload is parsed
    async fn gate_and_dispatch(
        &self,
        connection_id: &ConnectionId,
        frame: &ClientFrame,
    ) -> RelayResult<AckResponse> {
        if ClientRequest::is_gated(&frame.event) {
            self.authorize(connection_id).await?;
        }
        let request = ClientRequest::from_frame(frame)?;
        self.dispatch(connection_id, request).await
    }

    async fn dispatch(
        &self,
        connection_id: &ConnectionId,
        request: ClientRequest,
    ) -> RelayResult<AckResponse> {
        match request {
            ClientRequest::JoinRoom { user_id } => {
                self.join_room(connection_id, &UserId::new(user_id)).await
            }
            ClientRequest::SendNotification {
                user_id,
                notification_type,
                data,
            } => {
                self.send_notification(
                    connection_id,
                    &UserId::new(user_id),
                    Value::String(notification_type),
                    data,
                )
                .await
            }
            ClientRequest::GetUnreadCount => self.get_unread_count(connection_id).await,
            ClientRequest::SetPresence { status } => self.set_presence(connection_id, status).await,
            ClientRequest::GetPresence { user_id } => {
                self.get_presence(connection_id, &UserId::new(user_id)).await
            }
        }
    }

    /// Verify the handshake credential and bind its identity to the connection
    async fn authorize(&self, connection_id: &ConnectionId) -> RelayResult<UserId> {
        let handshake = {
            let sessions = self.sessions.read().await;
            sessions
                .get(connection_id)
                .map(|s| s.handshake.clone())
                .ok_or_else(|| RelayError::UnknownConnection(connection_id.to_string()))?
        };

        let user_id = self.verifier.authenticate(&handshake)?;

        if let Some(session) = self.sessions.write().await.get_mut(connection_id) {
            session.user_id = Some(user_id.clone());
        }
        Ok(user_id)
    }

    async fn is_joined(&self, connection_id: &ConnectionId) -> bool {
        self.sessions
            .read()
            .await
            .get(connection_id)
            .map(|s| s.joined)
            .unwrap_or(false)
    }

    pub async fn join_room(
        &self,
        connection_id: &ConnectionId,
        claimed: &UserId,
    ) -> RelayResult<AckResponse> {
        let user_id = self.authorize(connection_id).await?;
        if &user_id != claimed {
            warn!(
                connection_id = %connection_id,
                user_id = %user_id,
                claimed = %claimed,
                "join rejected, identity mismatch"
            );
            return Err(RelayError::unauthorized("Unauthorized to join this room"));
        }

        if self.is_joined(connection_id).await {
            return Ok(AckResponse::success(format!(
                "Already joined room for user {}",
                user_id
            )));
        }

        let room = user_id.room();
        self.connections.join(connection_id, &room).await?;

        if let Err(e) = self.presence.on_join(&user_id, connection_id).await {
            self.connections.leave(connection_id, &room).await;
            return Err(e);
        }

        if let Some(session) = self.sessions.write().await.get_mut(connection_id) {
            session.joined = true;
        }

        info!(connection_id = %connection_id, room = %room, "user joined room");
        Ok(AckResponse::success(format!("Joined room for user {}", user_id)))
    }

    pub async fn send_notification(
        &self,
        connection_id: &ConnectionId,
        recipient: &UserId,
        notification_type: Value,
        data: Value,
    ) -> RelayResult<AckResponse> {
        let sender = self.authorize(connection_id).await?;
        if !self.is_joined(connection_id).await {
            return Err(RelayError::unauthorized(
                "Join your room before sending notifications",
            ));
        }

        let payload = json!({
            "userId": recipient.as_str(),
            "type": notification_type,
            "data": data,
            "senderId": sender.as_str(),
        });
        self.bus
            .publish(&self.notifications_exchange, NOTIFICATION_ROUTING_KEY, &payload)
            .await?;

        debug!(sender = %sender, recipient = %recipient, "notification published");
        Ok(AckResponse::success("Notification sent"))
    }

    pub async fn get_unread_count(&self, connection_id: &ConnectionId) -> RelayResult<AckResponse> {
        let user_id = self.authorize(connection_id).await?;
        let count = self.unread.unread_count(&user_id).await?;
        Ok(AckResponse::success_with_data(json!({ "unreadCount": count })))
    }

    pub async fn set_presence(
        &self,
        connection_id: &ConnectionId,
        status: PresenceStatus,
    ) -> RelayResult<AckResponse> {
        let user_id = self.authorize(connection_id).await?;
        if !self.is_joined(connection_id).await {
            return Err(RelayError::unauthorized("Join your room before setting presence"));
        }

        self.presence.set_presence(&user_id, status).await?;
        Ok(AckResponse::success(format!("Presence set to {}", status)))
    }

    pub async fn get_presence(
        &self,
        connection_id: &ConnectionId,
        target: &UserId,
    ) -> RelayResult<AckResponse> {
        self.authorize(connection_id).await?;
        let status = self.presence.get_presence(target).await?;
        Ok(AckResponse::success_with_data(json!({
            "userId": target.as_str(),
            "presence": status,
        })))
    }

    /// Tear down a closed connection.
    ///
    /// Returns `None` when the connection was already gone.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Option<DisconnectOutcome> {
        let session = self.sessions.write().await.remove(connection_id)?;
        self.connections.unregister(connection_id).await;
        metrics::connection_closed();

        let outcome = match &session.user_id {
            Some(user_id) => {
                self.presence
                    .on_disconnect(user_id, connection_id, session.joined)
                    .await
            }
            None => DisconnectOutcome::default(),
        };

        info!(
            connection_id = %connection_id,
            user_id = ?session.user_id.as_ref().map(UserId::as_str),
            went_offline = outcome.went_offline,
            "client disconnected"
        );
        Some(outcome)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{bearer, TestHarness};

    #[tokio::test]
    async fn test_connect_sends_greeting() {
        let harness = TestHarness::new();
        let (id, mut rx) = harness.sessions.connect(Handshake::default()).await.unwrap();

        match rx.recv().await {
            Some(ServerMessage::ConnectionStatus(payload)) => {
                assert_eq!(payload.status, "connected");
                assert_eq!(payload.client_id, id.as_str());
            }
            other => panic!("unexpected first message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_credential_rejected_at_connect() {
        let harness = TestHarness::new();
        let err = harness
            .sessions
            .connect(Handshake::with_bearer("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized(_)));
        assert_eq!(harness.sessions.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_join_is_rejected() {
        let harness = TestHarness::new();
        let (id, _rx) = harness.sessions.connect(Handshake::default()).await.unwrap();

        let err = harness
            .sessions
            .join_room(&id, &UserId::new("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_rejoin_has_no_side_effects() {
        let harness = TestHarness::new();
        let (id, _rx) = harness.sessions.connect(bearer("u1")).await.unwrap();
        let user = UserId::new("u1");

        harness.sessions.join_room(&id, &user).await.unwrap();
        let published = harness.bus.published().len();

        let ack = harness.sessions.join_room(&id, &user).await.unwrap();
        assert!(ack.is_success());
        assert_eq!(harness.bus.published().len(), published);
        assert_eq!(harness.connections.room_size("user_u1").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_event_becomes_error_ack() {
        let harness = TestHarness::new();
        let (id, _rx) = harness.sessions.connect(Handshake::default()).await.unwrap();

        let reply = harness
            .sessions
            .handle_text(&id, r#"{"event":"dance","id":9}"#)
            .await;
        match reply {
            ServerMessage::Ack { event, id, response } => {
                assert_eq!(event, "dance");
                assert_eq!(id, Some(json!(9)));
                assert!(!response.is_success());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_frame_does_not_break_connection() {
        let harness = TestHarness::new();
        let (id, _rx) = harness.sessions.connect(Handshake::default()).await.unwrap();

        let reply = harness.sessions.handle_text(&id, "{{{").await;
        assert_eq!(reply.event_name(), "error");
        assert!(harness.connections.contains(&id).await);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let harness = TestHarness::new();
        let (id, _rx) = harness.sessions.connect(Handshake::default()).await.unwrap();

        assert!(harness.sessions.disconnect(&id).await.is_some());
        assert!(harness.sessions.disconnect(&id).await.is_none());
        assert!(!harness.connections.contains(&id).await);
    }
}
