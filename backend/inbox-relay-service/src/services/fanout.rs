//! Bus-to-websocket fan-out
//!
//! Three queues are bound on the notifications exchange. Each delivery is
//! validated once into a [`RelayEvent`] and pushed to local connections:
//!
//! | pattern      | queue                          | push              | target            |
//! |--------------|--------------------------------|-------------------|-------------------|
//! | `inbox.*`    | `realtime-inbox-notifications` | `notification`    | `user_<userId>`   |
//! | `chat.*`     | `realtime-chat-messages`       | `chat_message`    | `user_<recipientId>` |
//! | `presence.*` | `realtime-presence-updates`    | `presence_update` | every connection  |

use crate::bus::{BusEvent, EventHandler, QueueBinding, SubscriptionTable};
use crate::error::{RelayError, RelayResult};
use crate::websocket::messages::{
    iso_timestamp, ChatMessagePayload, NotificationPayload, PresenceUpdatePayload,
};
use crate::websocket::{ConnectionManager, ServerMessage, UserId};
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const INBOX_QUEUE: &str = "realtime-inbox-notifications";
pub const CHAT_QUEUE: &str = "realtime-chat-messages";
pub const PRESENCE_QUEUE: &str = "realtime-presence-updates";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Inbox,
    Chat,
    Presence,
}

impl EventClass {
    pub const ALL: [EventClass; 3] = [EventClass::Inbox, EventClass::Chat, EventClass::Presence];

    pub fn queue(&self) -> &'static str {
        match self {
            EventClass::Inbox => INBOX_QUEUE,
            EventClass::Chat => CHAT_QUEUE,
            EventClass::Presence => PRESENCE_QUEUE,
        }
    }

    pub fn pattern(&self) -> &'static str {
        match self {
            EventClass::Inbox => "inbox.*",
            EventClass::Chat => "chat.*",
            EventClass::Presence => "presence.*",
        }
    }
}

/// A validated bus payload
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Inbox {
        user_id: UserId,
        notification_type: Value,
        data: Value,
    },
    Chat {
        recipient_id: UserId,
        sender_id: Value,
        conversation_id: Value,
        content: Value,
    },
    Presence {
        user_id: String,
        status: String,
    },
}

impl RelayEvent {
    pub fn parse(class: EventClass, payload: &Value) -> RelayResult<Self> {
        match class {
            EventClass::Inbox => Ok(RelayEvent::Inbox {
                user_id: UserId::new(required_id(payload, "userId")?),
                notification_type: optional(payload, "type"),
                data: optional(payload, "data"),
            }),
            EventClass::Chat => Ok(RelayEvent::Chat {
                recipient_id: UserId::new(required_id(payload, "recipientId")?),
                sender_id: optional(payload, "senderId"),
                conversation_id: optional(payload, "conversationId"),
                content: optional(payload, "content"),
            }),
            EventClass::Presence => Ok(RelayEvent::Presence {
                user_id: required_id(payload, "userId")?,
                status: required_id(payload, "status")?,
            }),
        }
    }
}

/// Ids may arrive as strings or numbers; anything else counts as missing
fn required_id(payload: &Value, field: &str) -> RelayResult<String> {
    let value = match payload.get(field) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(RelayError::malformed(format!("missing {}", field))),
    };
    Ok(value)
}

fn optional(payload: &Value, field: &str) -> Value {
    payload.get(field).cloned().unwrap_or(Value::Null)
}

/// Pushes bus events to the local connections they target
#[derive(Clone)]
pub struct FanoutRouter {
    connections: ConnectionManager,
}

impl FanoutRouter {
    pub fn new(connections: ConnectionManager) -> Self {
        Self { connections }
    }

    /// Deliver a validated event. Returns how many connections received it.
    pub async fn route(&self, event: RelayEvent) -> usize {
        let timestamp = iso_timestamp();
        match event {
            RelayEvent::Inbox {
                user_id,
                notification_type,
                data,
            } => {
                let message = ServerMessage::Notification(NotificationPayload {
                    notification_type,
                    data,
                    timestamp,
                });
                let delivered = self.connections.emit_to_room(&user_id.room(), &message).await;
                debug!(room = %user_id.room(), delivered, "notification emitted");
                delivered
            }
            RelayEvent::Chat {
                recipient_id,
                sender_id,
                conversation_id,
                content,
            } => {
                let message = ServerMessage::ChatMessage(ChatMessagePayload {
                    sender_id,
                    conversation_id,
                    content,
                    timestamp,
                });
                let delivered = self
                    .connections
                    .emit_to_room(&recipient_id.room(), &message)
                    .await;
                debug!(room = %recipient_id.room(), delivered, "chat message emitted");
                delivered
            }
            RelayEvent::Presence { user_id, status } => {
                let message = ServerMessage::PresenceUpdate(PresenceUpdatePayload {
                    user_id: user_id.clone(),
                    status,
                    timestamp,
                });
                let delivered = self.connections.broadcast(&message).await;
                debug!(user_id = %user_id, delivered, "presence update broadcast");
                delivered
            }
        }
    }

    /// Validate and route one delivery. Malformed payloads are logged and dropped.
    pub async fn handle(&self, class: EventClass, event: &BusEvent) -> RelayResult<usize> {
        match RelayEvent::parse(class, &event.payload) {
            Ok(relay_event) => Ok(self.route(relay_event).await),
            Err(e) => {
                warn!(
                    queue = class.queue(),
                    routing_key = %event.routing_key,
                    error = %e,
                    "dropping malformed event"
                );
                Err(e)
            }
        }
    }

    /// The queue bindings served by this router
    pub fn subscription_table(self: &Arc<Self>, exchange: &str) -> SubscriptionTable {
        let mut table = SubscriptionTable::new();
        for class in EventClass::ALL {
            let router = Arc::clone(self);
            let handler: EventHandler = Arc::new(move |event: BusEvent| {
                let router = router.clone();
                async move { router.handle(class, &event).await.map(|_| ()) }.boxed()
            });
            table.bind(
                QueueBinding::new(class.queue(), exchange, class.pattern()),
                handler,
            );
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_inbox_requires_user_id() {
        let event = RelayEvent::parse(
            EventClass::Inbox,
            &json!({"userId": 42, "type": "like", "data": {"postId": 7}}),
        )
        .unwrap();
        assert_eq!(
            event,
            RelayEvent::Inbox {
                user_id: UserId::new("42"),
                notification_type: json!("like"),
                data: json!({"postId": 7}),
            }
        );

        let err = RelayEvent::parse(EventClass::Inbox, &json!({"type": "like"})).unwrap_err();
        assert!(matches!(err, RelayError::MalformedEvent(_)));
    }

    #[test]
    fn test_parse_presence_requires_both_fields() {
        assert!(RelayEvent::parse(EventClass::Presence, &json!({"userId": "u1"})).is_err());
        assert!(RelayEvent::parse(EventClass::Presence, &json!({"status": "online"})).is_err());
        assert!(
            RelayEvent::parse(EventClass::Presence, &json!({"userId": "u1", "status": "away"}))
                .is_ok()
        );
    }

    #[test]
    fn test_parse_chat_requires_recipient() {
        assert!(RelayEvent::parse(EventClass::Chat, &json!({"senderId": "u1"})).is_err());
    }

    #[tokio::test]
    async fn test_empty_room_is_noop() {
        let router = FanoutRouter::new(ConnectionManager::new());
        let delivered = router
            .route(RelayEvent::Inbox {
                user_id: UserId::new("nobody"),
                notification_type: json!("like"),
                data: Value::Null,
            })
            .await;
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_subscription_table_bindings() {
        let router = Arc::new(FanoutRouter::new(ConnectionManager::new()));
        let table = router.subscription_table("clothme.notifications");
        let queues: Vec<&str> = table
            .subscriptions()
            .iter()
            .map(|s| s.binding.queue.as_str())
            .collect();
        assert_eq!(queues, vec![INBOX_QUEUE, CHAT_QUEUE, PRESENCE_QUEUE]);
    }
}
