/// WebSocket frame types for the inbox namespace
///
/// Client frames: `{"event": "join_room", "id": 1, "data": {...}}`
/// Server frames: `{"event": "notification", "data": {...}}`; replies echo the
/// request's `event` and `id`.
use crate::error::{RelayError, RelayResult};
use crate::registry::PresenceStatus;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RFC 3339 UTC timestamp with millisecond precision
pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Raw frame received from a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct JoinRoomPayload {
    user_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SendNotificationPayload {
    user_id: String,
    #[serde(rename = "type")]
    notification_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct SetPresencePayload {
    status: PresenceStatus,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GetPresencePayload {
    user_id: String,
}

/// Validated client request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    JoinRoom {
        user_id: String,
    },
    SendNotification {
        user_id: String,
        notification_type: String,
        data: Value,
    },
    GetUnreadCount,
    SetPresence {
        status: PresenceStatus,
    },
    GetPresence {
        user_id: String,
    },
}

impl ClientRequest {
    pub const JOIN_ROOM: &'static str = "join_room";
    pub const SEND_NOTIFICATION: &'static str = "send_notification";
    pub const GET_UNREAD_COUNT: &'static str = "get_unread_count";
    pub const SET_PRESENCE: &'static str = "set_presence";
    pub const GET_PRESENCE: &'static str = "get_presence";

    /// Events that require a verified identity before their payload is read
    pub fn is_gated(event: &str) -> bool {
        matches!(
            event,
            Self::JOIN_ROOM
                | Self::SEND_NOTIFICATION
                | Self::GET_UNREAD_COUNT
                | Self::SET_PRESENCE
                | Self::GET_PRESENCE
        )
    }

    pub fn from_frame(frame: &ClientFrame) -> RelayResult<Self> {
        let data = frame.data.clone();
        match frame.event.as_str() {
            Self::JOIN_ROOM => {
                let payload: JoinRoomPayload = serde_json::from_value(data)?;
                require_non_empty("userId", &payload.user_id)?;
                Ok(ClientRequest::JoinRoom {
                    user_id: payload.user_id,
                })
            }
            Self::SEND_NOTIFICATION => {
                let payload: SendNotificationPayload = serde_json::from_value(data)?;
                require_non_empty("userId", &payload.user_id)?;
                require_non_empty("type", &payload.notification_type)?;
                Ok(ClientRequest::SendNotification {
                    user_id: payload.user_id,
                    notification_type: payload.notification_type,
                    data: payload.data,
                })
            }
            Self::GET_UNREAD_COUNT => Ok(ClientRequest::GetUnreadCount),
            Self::SET_PRESENCE => {
                let payload: SetPresencePayload = serde_json::from_value(data)?;
                if payload.status == PresenceStatus::Offline {
                    return Err(RelayError::validation(
                        "status must be 'online' or 'away'",
                    ));
                }
                Ok(ClientRequest::SetPresence {
                    status: payload.status,
                })
            }
            Self::GET_PRESENCE => {
                let payload: GetPresencePayload = serde_json::from_value(data)?;
                require_non_empty("userId", &payload.user_id)?;
                Ok(ClientRequest::GetPresence {
                    user_id: payload.user_id,
                })
            }
            other => Err(RelayError::validation(format!("unknown event '{}'", other))),
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> RelayResult<()> {
    if value.trim().is_empty() {
        return Err(RelayError::validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Acknowledgement returned for every client request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    pub fn success_with_data(data: Value) -> Self {
        Self {
            status: "success".to_string(),
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
            data: None,
            error,
        }
    }

    pub fn from_error(err: &RelayError) -> Self {
        Self::error(err.client_message(), Some(err.code().to_string()))
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusPayload {
    pub status: String,
    pub message: String,
    pub client_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub notification_type: Value,
    pub data: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub sender_id: Value,
    pub conversation_id: Value,
    pub content: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdatePayload {
    pub user_id: String,
    pub status: String,
    pub timestamp: String,
}

/// Messages delivered to a local connection
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ConnectionStatus(ConnectionStatusPayload),
    Notification(NotificationPayload),
    ChatMessage(ChatMessagePayload),
    PresenceUpdate(PresenceUpdatePayload),
    /// Reply to a client request
    Ack {
        event: String,
        id: Option<Value>,
        response: AckResponse,
    },
}

#[derive(Serialize)]
struct OutboundFrame<'a, T: Serialize> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Value>,
    data: &'a T,
}

impl ServerMessage {
    pub fn connected(client_id: &str) -> Self {
        ServerMessage::ConnectionStatus(ConnectionStatusPayload {
            status: "connected".to_string(),
            message: "Connected to inbox namespace. Please join a room to receive notifications."
                .to_string(),
            client_id: client_id.to_string(),
            timestamp: iso_timestamp(),
        })
    }

    pub fn ack(frame: &ClientFrame, response: AckResponse) -> Self {
        ServerMessage::Ack {
            event: frame.event.clone(),
            id: frame.id.clone(),
            response,
        }
    }

    /// Event name the frame is sent under
    pub fn event_name(&self) -> &str {
        match self {
            ServerMessage::ConnectionStatus(_) => "connection_status",
            ServerMessage::Notification(_) => "notification",
            ServerMessage::ChatMessage(_) => "chat_message",
            ServerMessage::PresenceUpdate(_) => "presence_update",
            ServerMessage::Ack { event, .. } => event,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let event = self.event_name();
        match self {
            ServerMessage::ConnectionStatus(data) => frame_json(event, None, data),
            ServerMessage::Notification(data) => frame_json(event, None, data),
            ServerMessage::ChatMessage(data) => frame_json(event, None, data),
            ServerMessage::PresenceUpdate(data) => frame_json(event, None, data),
            ServerMessage::Ack { id, response, .. } => frame_json(event, id.as_ref(), response),
        }
    }
}

fn frame_json<T: Serialize>(
    event: &str,
    id: Option<&Value>,
    data: &T,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundFrame { event, id, data })
}
