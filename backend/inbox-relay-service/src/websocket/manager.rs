/// Local connection manager
///
/// Tracks the WebSocket connections attached to this relay instance and the
/// rooms they joined. It never sees connections held by other instances;
/// cross-instance presence lives in the socket registry.
use super::{ConnectionId, ServerMessage};
use crate::error::{RelayError, RelayResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Type alias for the per-connection outbound channel
pub type ConnectionSender = mpsc::UnboundedSender<ServerMessage>;

struct LocalConnection {
    sender: ConnectionSender,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, LocalConnection>,
    /// room name -> member connections
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

/// Thread-safe registry of local connections and room membership
#[derive(Clone, Default)]
pub struct ConnectionManager {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and return the receiving end of its
    /// outbound channel
    pub async fn register(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            id,
            LocalConnection {
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        rx
    }

    /// Remove a connection from every room it joined.
    ///
    /// Returns false if the connection was not registered.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(conn) = inner.connections.remove(id) else {
            return false;
        };

        for room in conn.rooms {
            if let Some(members) = inner.rooms.get_mut(&room) {
                members.remove(id);
                if members.is_empty() {
                    inner.rooms.remove(&room);
                }
            }
        }
        true
    }

    /// Add a connection to a room. Returns true if it was not a member yet.
    pub async fn join(&self, id: &ConnectionId, room: &str) -> RelayResult<bool> {
        let mut inner = self.inner.write().await;
        let conn = inner
            .connections
            .get_mut(id)
            .ok_or_else(|| RelayError::UnknownConnection(id.to_string()))?;

        let added = conn.rooms.insert(room.to_string());
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id.clone());

        Ok(added)
    }

    pub async fn leave(&self, id: &ConnectionId, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner
            .connections
            .get_mut(id)
            .map(|conn| conn.rooms.remove(room))
            .unwrap_or(false);

        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
        removed
    }

    /// Send a message to one connection. Returns false if it is gone.
    pub async fn send_to(&self, id: &ConnectionId, message: ServerMessage) -> bool {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(id)
            .map(|conn| conn.sender.send(message).is_ok())
            .unwrap_or(false)
    }

    /// Emit to every connection in a room.
    ///
    /// Returns the number of connections the message was handed to; an empty
    /// or unknown room is a no-op.
    pub async fn emit_to_room(&self, room: &str, message: &ServerMessage) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return 0;
        };

        members
            .iter()
            .filter_map(|id| inner.connections.get(id))
            // Ignore send errors (connection might be closing)
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Emit to every local connection regardless of room
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    pub async fn is_member(&self, id: &ConnectionId, room: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .rooms
            .get(room)
            .map(|members| members.contains(id))
            .unwrap_or(false)
    }

    pub async fn room_size(&self, room: &str) -> usize {
        let inner = self.inner.read().await;
        inner.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub async fn total_connections(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::messages::{iso_timestamp, PresenceUpdatePayload};

    fn presence(user: &str) -> ServerMessage {
        ServerMessage::PresenceUpdate(PresenceUpdatePayload {
            user_id: user.to_string(),
            status: "online".to_string(),
            timestamp: iso_timestamp(),
        })
    }

    #[tokio::test]
    async fn test_connection_manager_creation() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.total_connections().await, 0);
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let manager = ConnectionManager::new();
        let id = ConnectionId::new("c1");
        let _rx = manager.register(id.clone()).await;
        manager.join(&id, "user_u1").await.unwrap();

        assert!(manager.contains(&id).await);
        assert_eq!(manager.room_size("user_u1").await, 1);

        assert!(manager.unregister(&id).await);
        assert!(!manager.contains(&id).await);
        assert_eq!(manager.room_size("user_u1").await, 0);
        assert!(!manager.unregister(&id).await);
    }

    #[tokio::test]
    async fn test_join_unknown_connection_fails() {
        let manager = ConnectionManager::new();
        let err = manager
            .join(&ConnectionId::new("ghost"), "user_u1")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnknownConnection(_)));
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let manager = ConnectionManager::new();
        let id = ConnectionId::new("c1");
        let _rx = manager.register(id.clone()).await;

        assert!(manager.join(&id, "user_u1").await.unwrap());
        assert!(!manager.join(&id, "user_u1").await.unwrap());
        assert_eq!(manager.room_size("user_u1").await, 1);
    }

    #[tokio::test]
    async fn test_emit_to_room_only_reaches_members() {
        let manager = ConnectionManager::new();
        let a = ConnectionId::new("a");
        let b = ConnectionId::new("b");
        let mut rx_a = manager.register(a.clone()).await;
        let mut rx_b = manager.register(b.clone()).await;
        manager.join(&a, "user_u1").await.unwrap();
        manager.join(&b, "user_u2").await.unwrap();

        let delivered = manager.emit_to_room("user_u1", &presence("u1")).await;
        assert_eq!(delivered, 1);
        assert!(matches!(rx_a.recv().await, Some(ServerMessage::PresenceUpdate(_))));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_to_empty_room_is_noop() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.emit_to_room("user_nobody", &presence("x")).await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_unjoined_connections() {
        let manager = ConnectionManager::new();
        let mut receivers = vec![];
        for i in 0..3 {
            receivers.push(manager.register(ConnectionId::new(format!("c{}", i))).await);
        }

        assert_eq!(manager.broadcast(&presence("u9")).await, 3);
        for mut rx in receivers {
            assert!(matches!(rx.recv().await, Some(ServerMessage::PresenceUpdate(_))));
        }
    }

    #[tokio::test]
    async fn test_closed_receiver_not_counted() {
        let manager = ConnectionManager::new();
        let id = ConnectionId::new("c1");
        let rx = manager.register(id.clone()).await;
        manager.join(&id, "user_u1").await.unwrap();
        drop(rx);

        assert_eq!(manager.emit_to_room("user_u1", &presence("u1")).await, 0);
        assert!(!manager.send_to(&id, presence("u1")).await);
    }

    #[tokio::test]
    async fn test_leave_room() {
        let manager = ConnectionManager::new();
        let id = ConnectionId::new("c1");
        let _rx = manager.register(id.clone()).await;
        manager.join(&id, "user_u1").await.unwrap();

        assert!(manager.leave(&id, "user_u1").await);
        assert!(!manager.is_member(&id, "user_u1").await);
        assert_eq!(manager.room_size("user_u1").await, 0);
    }
}
