//! Order event publisher.
//!
//! Publishing is best effort: the order is already persisted when we get here,
//! so a broker failure is logged against the order id and swallowed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use super::connection::ConnectionManager;
use super::transport::{BrokerChannel, MessageEnvelope};
use crate::error::{MessagingError, PipelineError};
use crate::types::{BrokerSettings, OrderCreatedEvent};

/// Publishes persistent messages to durable queues.
pub struct OrderPublisher {
    connections: Arc<ConnectionManager>,
    queue_name: String,
    publish_timeout: Duration,
}

impl OrderPublisher {
    /// Create a publisher sharing the given connection manager.
    pub fn new(connections: Arc<ConnectionManager>, settings: &BrokerSettings) -> Self {
        Self {
            connections,
            queue_name: settings.queue_name.clone(),
            publish_timeout: settings.publish_timeout,
        }
    }

    /// Queue that order events go to.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Announce a newly created order. Never fails.
    pub async fn publish_order_created(&self, order_id: &str) {
        let event = OrderCreatedEvent::new(order_id);
        match serde_json::to_vec(&event) {
            Ok(body) => self.publish(order_id, &self.queue_name, &body).await,
            Err(e) => error!(order_id = %order_id, error = %e, "Failed to encode order event"),
        }
    }

    /// Best-effort publish. Failures are logged with `key` and swallowed.
    pub async fn publish(&self, key: &str, queue_name: &str, payload: &[u8]) {
        match self.try_publish(queue_name, payload).await {
            Ok(()) => info!(key = %key, queue = %queue_name, "Message published"),
            Err(e) => error!(
                key = %key,
                queue = %queue_name,
                error = %e,
                "Failed to publish message"
            ),
        }
    }

    /// Publish a persistent message, bounded by the publish timeout.
    ///
    /// Timing out here only stops waiting: a connection dial already under way
    /// keeps going and serves later publishes.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn try_publish(&self, queue_name: &str, payload: &[u8]) -> Result<(), PipelineError> {
        match tokio::time::timeout(self.publish_timeout, self.publish_once(queue_name, payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(MessagingError::timeout("publish", self.publish_timeout).into()),
        }
    }

    async fn publish_once(&self, queue_name: &str, payload: &[u8]) -> Result<(), PipelineError> {
        let conn = self.connections.acquire_connection().await?;
        let channel = conn.open_channel().await?;

        let result = declare_and_send(channel.as_ref(), queue_name, payload).await;

        // Short-lived channel: released whatever happened above.
        if let Err(e) = channel.close().await {
            debug!(error = %e, "Failed to close publish channel");
        }
        result.map_err(PipelineError::from)
    }
}

async fn declare_and_send(
    channel: &dyn BrokerChannel,
    queue_name: &str,
    payload: &[u8],
) -> Result<(), MessagingError> {
    channel.declare_durable_queue(queue_name).await?;
    channel
        .publish(queue_name, &MessageEnvelope::persistent_json(payload.to_vec()))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::memory::MemoryBroker;
    use crate::ORDERS_QUEUE;
    use pretty_assertions::assert_eq;

    fn publisher(broker: &MemoryBroker, settings: BrokerSettings) -> OrderPublisher {
        let manager = Arc::new(ConnectionManager::new(&settings, broker.connector()));
        OrderPublisher::new(manager, &settings)
    }

    fn fast_settings(url: &str) -> BrokerSettings {
        BrokerSettings::new(url).with_backoff(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_order_event_is_persistent_and_durable() {
        let broker = MemoryBroker::new().with_reachable_host("localhost");
        let publisher = publisher(&broker, fast_settings("amqp://localhost:5672"));

        publisher.publish_order_created("abc123").await;

        let published = broker.published(ORDERS_QUEUE);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, br#"{"order_id":"abc123"}"#.to_vec());
        assert!(published[0].persistent);
        assert_eq!(published[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(broker.is_durable(ORDERS_QUEUE), Some(true));
    }

    #[tokio::test]
    async fn test_repeated_publishes_share_connection() {
        let broker = MemoryBroker::new().with_reachable_host("localhost");
        let publisher = publisher(&broker, fast_settings("amqp://localhost:5672"));

        for id in ["a", "b", "c"] {
            publisher.publish_order_created(id).await;
        }

        assert_eq!(broker.connection_attempts().len(), 1);
        assert_eq!(broker.declarations(ORDERS_QUEUE), 3);
        assert_eq!(broker.published(ORDERS_QUEUE).len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_swallowed() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, fast_settings("amqp://localhost:5672"));

        assert!(publisher.try_publish(ORDERS_QUEUE, b"{}").await.is_err());
        // must return normally
        publisher.publish_order_created("abc123").await;
        assert!(broker.published(ORDERS_QUEUE).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_is_bounded_by_timeout() {
        let broker = MemoryBroker::new();
        broker.set_unresponsive("broker.internal");
        let settings = BrokerSettings::new("amqp://broker.internal:5672")
            .with_connect_timeout(Duration::from_secs(30))
            .with_publish_timeout(Duration::from_secs(2));
        let publisher = publisher(&broker, settings);

        let started = tokio::time::Instant::now();
        let err = publisher.try_publish(ORDERS_QUEUE, b"{}").await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(
            err,
            PipelineError::Messaging(MessagingError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_primary_still_reaches_alternate() {
        let broker = MemoryBroker::new().with_reachable_host("host.docker.internal");
        broker.set_unresponsive("localhost");
        let publisher = publisher(&broker, BrokerSettings::new("amqp://localhost:5672"));

        let mut timed_out = 0;
        for _ in 0..5 {
            match publisher.try_publish(ORDERS_QUEUE, br#"{"order_id":"abc123"}"#).await {
                Ok(()) => break,
                Err(PipelineError::Messaging(MessagingError::Timeout { .. })) => timed_out += 1,
                Err(other) => panic!("unexpected publish error: {other}"),
            }
        }

        // the dial needs 11s on localhost, each publish waits 5s
        assert_eq!(timed_out, 2);
        assert_eq!(broker.published(ORDERS_QUEUE).len(), 1);
        assert_eq!(
            broker.connection_attempts(),
            vec![
                "amqp://localhost:5672",
                "amqp://localhost:5672",
                "amqp://host.docker.internal:5672",
            ]
        );
    }

    #[tokio::test]
    async fn test_publisher_recovers_after_broker_returns() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, fast_settings("amqp://localhost:5672"));

        publisher.publish_order_created("lost").await;
        broker.set_reachable("localhost", true);
        publisher.publish_order_created("kept").await;

        let published = broker.published(ORDERS_QUEUE);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, br#"{"order_id":"kept"}"#.to_vec());
    }
}
