use super::{BusEvent, RoutingPattern};
use crate::config::QueueMode;
use crate::error::RelayResult;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Async callback invoked for every event delivered to a queue
pub type EventHandler = Arc<dyn Fn(BusEvent) -> BoxFuture<'static, RelayResult<()>> + Send + Sync>;

/// A durable queue bound to an exchange with a routing pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: String,
    pub pattern: RoutingPattern,
}

impl QueueBinding {
    pub fn new(queue: impl Into<String>, exchange: impl Into<String>, pattern: &str) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            pattern: RoutingPattern::new(pattern),
        }
    }

    pub fn accepts(&self, event: &BusEvent) -> bool {
        event.exchange == self.exchange && self.pattern.matches(&event.routing_key)
    }
}

/// Consumer group backing a queue.
///
/// In fanout mode every relay instance gets its own group so each one sees
/// every event; in shared mode instances compete on one group.
pub fn consumer_group_id(queue: &str, mode: QueueMode, instance_id: &str) -> String {
    match mode {
        QueueMode::Fanout => format!("{}.{}", queue, instance_id),
        QueueMode::Shared => queue.to_string(),
    }
}

#[derive(Clone)]
pub struct Subscription {
    pub binding: QueueBinding,
    pub handler: EventHandler,
}

/// Declared queue bindings and their handlers
#[derive(Clone, Default)]
pub struct SubscriptionTable {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, binding: QueueBinding, handler: EventHandler) -> &mut Self {
        tracing::info!(
            queue = %binding.queue,
            exchange = %binding.exchange,
            pattern = %binding.pattern,
            "queue bound"
        );
        self.subscriptions.push(Subscription { binding, handler });
        self
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Distinct exchanges referenced by the bindings
    pub fn exchanges(&self) -> Vec<String> {
        let mut exchanges: Vec<String> = self
            .subscriptions
            .iter()
            .map(|s| s.binding.exchange.clone())
            .collect();
        exchanges.sort();
        exchanges.dedup();
        exchanges
    }

    /// Deliver an event to every queue whose binding accepts it.
    ///
    /// Handler failures are logged; delivery to the remaining queues continues.
    /// Returns the number of queues that received the event.
    pub async fn dispatch(&self, event: &BusEvent) -> usize {
        let mut delivered = 0;
        for subscription in &self.subscriptions {
            if !subscription.binding.accepts(event) {
                continue;
            }
            delivered += 1;
            if let Err(e) = (subscription.handler)(event.clone()).await {
                tracing::warn!(
                    queue = %subscription.binding.queue,
                    routing_key = %event.routing_key,
                    error = %e,
                    "event handler failed"
                );
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[test]
    fn test_consumer_group_id_per_mode() {
        assert_eq!(
            consumer_group_id("realtime-inbox-notifications", QueueMode::Fanout, "relay-1"),
            "realtime-inbox-notifications.relay-1"
        );
        assert_eq!(
            consumer_group_id("realtime-inbox-notifications", QueueMode::Shared, "relay-1"),
            "realtime-inbox-notifications"
        );
    }

    #[tokio::test]
    async fn test_dispatch_filters_by_exchange_and_pattern() {
        let inbox = Arc::new(AtomicUsize::new(0));
        let chat = Arc::new(AtomicUsize::new(0));

        let mut table = SubscriptionTable::new();
        table
            .bind(
                QueueBinding::new("inbox", "clothme.notifications", "inbox.*"),
                counting_handler(inbox.clone()),
            )
            .bind(
                QueueBinding::new("chat", "clothme.notifications", "chat.*"),
                counting_handler(chat.clone()),
            );

        let delivered = table
            .dispatch(&BusEvent::new("clothme.notifications", "inbox.notification", json!({})))
            .await;
        assert_eq!(delivered, 1);

        let delivered = table
            .dispatch(&BusEvent::new("clothme.events", "inbox.notification", json!({})))
            .await;
        assert_eq!(delivered, 0);

        assert_eq!(inbox.load(Ordering::SeqCst), 1);
        assert_eq!(chat.load(Ordering::SeqCst), 0);
        assert_eq!(table.exchanges(), vec!["clothme.notifications".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_other_queues() {
        let counter = Arc::new(AtomicUsize::new(0));
        let failing: EventHandler =
            Arc::new(|_event| async { Err(RelayError::malformed("bad payload")) }.boxed());

        let mut table = SubscriptionTable::new();
        table
            .bind(QueueBinding::new("a", "x", "#"), failing)
            .bind(QueueBinding::new("b", "x", "#"), counting_handler(counter.clone()));

        let delivered = table.dispatch(&BusEvent::new("x", "any.key", json!(null))).await;
        assert_eq!(delivered, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
