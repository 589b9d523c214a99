use super::{consumer_group_id, BusEvent, EventBus, Subscription, SubscriptionTable, ROUTING_KEY_HEADER};
use crate::config::KafkaConfig;
use crate::error::{RelayError, RelayResult};
use crate::metrics;
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Publisher backed by an rdkafka `FutureProducer`
#[derive(Clone)]
pub struct KafkaEventBus {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaEventBus {
    pub fn new(config: &KafkaConfig) -> RelayResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.publish_timeout_ms.to_string())
            .set("acks", "all")
            .set("retries", "3")
            .set("retry.backoff.ms", "100")
            .create()
            .map_err(|e| RelayError::StartServer(format!("failed to create Kafka producer: {}", e)))?;

        info!(brokers = %config.brokers, "event bus producer initialized");

        Ok(Self {
            producer,
            timeout: Duration::from_millis(config.publish_timeout_ms),
        })
    }

    /// Wait for in-flight publishes before shutdown
    pub fn flush(&self) -> RelayResult<()> {
        self.producer.flush(self.timeout)?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &Value) -> RelayResult<()> {
        let body = serde_json::to_string(payload)
            .map_err(|e| RelayError::Validation(format!("unserializable event payload: {}", e)))?;

        let headers = OwnedHeaders::new().insert(Header {
            key: ROUTING_KEY_HEADER,
            value: Some(routing_key.as_bytes()),
        });

        let record = FutureRecord::to(exchange)
            .key(routing_key)
            .payload(&body)
            .headers(headers);

        match self.producer.send(record, self.timeout).await {
            Ok((partition, offset)) => {
                debug!(exchange, routing_key, partition, offset, "event published");
                Ok(())
            }
            Err((e, _)) => {
                error!(exchange, routing_key, error = %e, "event publish failed");
                Err(e.into())
            }
        }
    }
}

/// Create the exchanges the relay depends on. Existing topics are left alone.
pub async fn provision_exchanges(config: &KafkaConfig, exchanges: &[String]) -> RelayResult<()> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("request.timeout.ms", "5000")
        .create()
        .map_err(|e| RelayError::StartServer(format!("failed to create Kafka admin client: {}", e)))?;

    let topics: Vec<NewTopic<'_>> = exchanges
        .iter()
        .map(|name| {
            NewTopic::new(
                name,
                config.topic_partitions,
                TopicReplication::Fixed(config.replication_factor),
            )
        })
        .collect();

    let results = admin
        .create_topics(&topics, &AdminOptions::new().operation_timeout(Some(Duration::from_secs(5))))
        .await?;

    for result in results {
        match result {
            Ok(topic) => info!(exchange = %topic, "exchange created"),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!(exchange = %topic, "exchange already exists")
            }
            Err((topic, code)) => {
                return Err(RelayError::upstream(format!(
                    "failed to create exchange {}: {}",
                    topic, code
                )))
            }
        }
    }
    Ok(())
}

/// Start one consumer task per queue binding
pub fn spawn_consumers(
    config: &KafkaConfig,
    instance_id: &str,
    table: &SubscriptionTable,
) -> RelayResult<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(table.len());
    for subscription in table.subscriptions() {
        let group_id = consumer_group_id(&subscription.binding.queue, config.queue_mode, instance_id);
        let consumer = QueueConsumer::new(config, group_id, subscription.clone())?;
        handles.push(tokio::spawn(consumer.run()));
    }
    Ok(handles)
}

struct QueueConsumer {
    consumer: StreamConsumer,
    subscription: Subscription,
}

impl QueueConsumer {
    fn new(config: &KafkaConfig, group_id: String, subscription: Subscription) -> RelayResult<Self> {
        let binding = &subscription.binding;
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("client.id", &config.client_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| RelayError::StartServer(format!("failed to create Kafka consumer: {}", e)))?;

        consumer.subscribe(&[binding.exchange.as_str()]).map_err(|e| {
            RelayError::StartServer(format!("failed to subscribe to {}: {}", binding.exchange, e))
        })?;

        info!(
            queue = %binding.queue,
            group_id = %group_id,
            exchange = %binding.exchange,
            pattern = %binding.pattern,
            "queue consumer subscribed"
        );

        Ok(Self {
            consumer,
            subscription,
        })
    }

    async fn run(self) {
        let queue = self.subscription.binding.queue.clone();
        loop {
            match self.consumer.recv().await {
                Ok(record) => {
                    let decoded = decode_record(
                        record.topic(),
                        header_value(&record, ROUTING_KEY_HEADER),
                        record.key(),
                        record.payload(),
                    );
                    let outcome = consume_record(&self.subscription, decoded, || {
                        self.consumer
                            .commit_message(&record, CommitMode::Async)
                            .map_err(RelayError::from)
                    })
                    .await;
                    debug!(queue = %queue, outcome = ?outcome, "record consumed");
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Kafka recv error, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// What happened to one consumed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Delivered,
    /// Routing key outside the queue's binding
    Skipped,
    Malformed,
    Failed,
}

/// Handle one record, then commit its offset whatever the outcome.
///
/// Malformed records and handler failures are acknowledged so a poison event
/// is never redelivered.
pub async fn consume_record<C>(
    subscription: &Subscription,
    decoded: RelayResult<BusEvent>,
    commit: C,
) -> RecordOutcome
where
    C: FnOnce() -> RelayResult<()>,
{
    let outcome = handle_record(subscription, decoded).await;
    if let Err(e) = commit() {
        warn!(queue = %subscription.binding.queue, error = %e, "failed to commit offset");
    }
    outcome
}

async fn handle_record(subscription: &Subscription, decoded: RelayResult<BusEvent>) -> RecordOutcome {
    let binding = &subscription.binding;

    let event = match decoded {
        Ok(event) => event,
        Err(e) => {
            warn!(queue = %binding.queue, error = %e, "dropping undecodable record");
            metrics::record_bus_event(&binding.queue, "malformed");
            return RecordOutcome::Malformed;
        }
    };

    if !binding.accepts(&event) {
        return RecordOutcome::Skipped;
    }

    let routing_key = event.routing_key.clone();
    match (subscription.handler)(event).await {
        Ok(()) => {
            metrics::record_bus_event(&binding.queue, "delivered");
            RecordOutcome::Delivered
        }
        Err(e) => {
            warn!(
                queue = %binding.queue,
                routing_key = %routing_key,
                error = %e,
                "event handler failed"
            );
            metrics::record_bus_event(&binding.queue, e.code());
            RecordOutcome::Failed
        }
    }
}

fn header_value<'a>(message: &'a BorrowedMessage<'a>, key: &str) -> Option<&'a str> {
    message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == key)
                .and_then(|header| header.value)
        })
        .and_then(|value| std::str::from_utf8(value).ok())
}

/// Turn a raw record into a bus event.
///
/// The routing key comes from the `routing-key` header, falling back to the
/// record key for producers that do not set headers.
pub fn decode_record(
    exchange: &str,
    header_routing_key: Option<&str>,
    record_key: Option<&[u8]>,
    payload: Option<&[u8]>,
) -> RelayResult<BusEvent> {
    let routing_key = header_routing_key
        .map(str::to_string)
        .or_else(|| record_key.and_then(|k| std::str::from_utf8(k).ok()).map(str::to_string))
        .filter(|k| !k.is_empty())
        .ok_or_else(|| RelayError::malformed("record has no routing key"))?;

    let payload = payload.ok_or_else(|| RelayError::malformed("record has no payload"))?;
    let payload: Value = serde_json::from_slice(payload)
        .map_err(|e| RelayError::malformed(format!("payload is not JSON: {}", e)))?;

    Ok(BusEvent::new(exchange, routing_key, payload))
}
