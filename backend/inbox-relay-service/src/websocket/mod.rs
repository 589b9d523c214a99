/// WebSocket real-time relay
///
/// Architecture:
/// 1. ConnectionManager: local connections of this instance and their rooms
/// 2. Messages: client request frames, server pushes and acknowledgements
/// 3. WsSession: actix actor bridging one socket to the session manager
///
/// Rooms are always `user_<userId>`; a joined connection belongs to exactly one.
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod manager;
pub mod messages;
pub mod session;

pub use manager::{ConnectionManager, ConnectionSender};
pub use messages::{AckResponse, ClientFrame, ClientRequest, ServerMessage};
pub use session::WsSession;

/// Authenticated principal, as carried in the credential
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the room holding this user's connections
    pub fn room(&self) -> String {
        format!("user_{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one live connection, assigned at connect time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_room_name() {
        assert_eq!(UserId::new("u1").room(), "user_u1");
    }

    #[test]
    fn test_generated_connection_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }
}
