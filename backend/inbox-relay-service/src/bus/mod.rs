//! Event bus client
//!
//! Exchanges are Kafka topics. Every record carries its routing key both as the
//! record key and in a `routing-key` header. Durable queues are consumer groups
//! that filter records by a topic-style binding pattern.

pub mod kafka;
pub mod routing;
pub mod subscription;

pub use kafka::{consume_record, provision_exchanges, spawn_consumers, KafkaEventBus, RecordOutcome};
pub use routing::RoutingPattern;
pub use subscription::{consumer_group_id, EventHandler, QueueBinding, Subscription, SubscriptionTable};

use crate::error::RelayResult;
use async_trait::async_trait;
use serde_json::Value;

/// Header carrying the routing key on every published record
pub const ROUTING_KEY_HEADER: &str = "routing-key";

/// A decoded event delivered from a queue
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Value,
}

impl BusEvent {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>, payload: Value) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload,
        }
    }
}

/// Publishing side of the bus.
///
/// Publishes are persistent and fire-and-forget from the caller's point of
/// view; a failed publish surfaces as an error but is never retried here.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &Value)
        -> RelayResult<()>;
}
