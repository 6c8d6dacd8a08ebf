//! Order notification consumer.
//!
//! Subscribes to the orders queue with explicit acknowledgement and a prefetch
//! bound, and settles every delivery exactly once. The handler reports success
//! or a typed error; the loop turns that into a [`Disposition`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::connection::ConnectionManager;
use super::transport::{BrokerChannel, Delivery, DeliveryStream};
use crate::error::PipelineError;
use crate::types::{BrokerSettings, ConsumerSettings, OrderCreatedEvent};

/// How a delivery is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove from the queue
    Ack,
    /// Reject and put back on the queue
    Requeue,
    /// Reject without requeueing
    Discard,
}

/// Settlement for messages that fail decoding or processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Consume and drop: no poison-message loops, malformed messages are lost.
    #[default]
    Acknowledge,
    /// Redeliver until some consumer succeeds.
    Requeue,
    /// Reject without requeue (dead-lettered if the queue has a DLX).
    Discard,
}

impl FailurePolicy {
    pub fn disposition(&self) -> Disposition {
        match self {
            FailurePolicy::Acknowledge => Disposition::Ack,
            FailurePolicy::Requeue => Disposition::Requeue,
            FailurePolicy::Discard => Disposition::Discard,
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ack" | "acknowledge" => Ok(FailurePolicy::Acknowledge),
            "requeue" => Ok(FailurePolicy::Requeue),
            "discard" | "drop" | "reject" => Ok(FailurePolicy::Discard),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

/// Consumer loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Connecting,
    Listening,
    Processing,
}

/// Handles one delivered payload.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<(), PipelineError>;
}

/// Side effect performed for every new order.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, order_id: &str) -> Result<(), PipelineError>;
}

/// Notifier that writes a log entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn notify(&self, order_id: &str) -> Result<(), PipelineError> {
        info!(order_id = %order_id, "New order received");
        Ok(())
    }
}

/// Decodes order events and hands the id to a notifier.
pub struct OrderNotificationHandler {
    notifier: Arc<dyn OrderNotifier>,
}

impl OrderNotificationHandler {
    pub fn new(notifier: Arc<dyn OrderNotifier>) -> Self {
        Self { notifier }
    }

    /// Parse a payload into an order event.
    pub fn decode(payload: &[u8]) -> Result<OrderCreatedEvent, PipelineError> {
        let event: OrderCreatedEvent = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::message_decode(e.to_string()))?;
        if event.order_id.trim().is_empty() {
            return Err(PipelineError::message_decode("order_id is empty"));
        }
        Ok(event)
    }
}

impl Default for OrderNotificationHandler {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

#[async_trait]
impl MessageHandler for OrderNotificationHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let event = Self::decode(payload)?;
        self.notifier.notify(&event.order_id).await
    }
}

/// Long-lived subscriber on the orders queue.
pub struct ConsumerLoop {
    connections: Arc<ConnectionManager>,
    handler: Arc<dyn MessageHandler>,
    queue_name: String,
    consumer_tag: String,
    prefetch: u16,
    failure_policy: FailurePolicy,
    resubscribe_delay: Duration,
    state: watch::Sender<ConsumerState>,
}

impl ConsumerLoop {
    pub fn new(
        connections: Arc<ConnectionManager>,
        handler: Arc<dyn MessageHandler>,
        broker: &BrokerSettings,
        consumer: &ConsumerSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);
        Self {
            connections,
            handler,
            queue_name: broker.queue_name.clone(),
            consumer_tag: format!("notifications-{}", uuid::Uuid::new_v4()),
            prefetch: consumer.prefetch,
            failure_policy: consumer.failure_policy,
            resubscribe_delay: broker.retry_backoff,
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Map a handler outcome to a settlement. Every failure follows the
    /// failure policy, whatever the error kind.
    pub fn disposition_for(&self, outcome: &Result<(), PipelineError>) -> Disposition {
        match outcome {
            Ok(()) => Disposition::Ack,
            Err(_) => self.failure_policy.disposition(),
        }
    }

    /// Run until `shutdown` resolves.
    ///
    /// Returns an error only when the broker cannot be reached (at startup or
    /// when resubscribing). The connection is closed on every exit.
    pub async fn run<S>(&self, shutdown: S) -> Result<(), PipelineError>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let result = loop {
            self.set_state(ConsumerState::Connecting);
            let subscribed = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                subscribed = self.subscribe() => subscribed,
            };
            let (channel, deliveries) = match subscribed {
                Ok(session) => session,
                Err(e) => break Err(e),
            };

            self.set_state(ConsumerState::Listening);
            info!(
                queue = %self.queue_name,
                prefetch = self.prefetch,
                "Listening for order events"
            );

            let interrupted = tokio::select! {
                _ = &mut shutdown => true,
                _ = self.drain(deliveries) => false,
            };
            if let Err(e) = channel.close().await {
                debug!(error = %e, "Failed to close consumer channel");
            }
            if interrupted {
                break Ok(());
            }

            warn!(queue = %self.queue_name, "Delivery stream ended, resubscribing");
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        };

        if let Err(e) = self.connections.close().await {
            warn!(error = %e, "Failed to close broker connection");
        }
        self.set_state(ConsumerState::Stopped);
        info!("Consumer stopped");
        result
    }

    /// Handle and settle one delivery.
    pub async fn process(&self, delivery: &dyn Delivery) -> Disposition {
        let tag = delivery.delivery_tag();
        let outcome = AssertUnwindSafe(self.handler.handle(delivery.payload()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(PipelineError::processing("handler panicked")));

        let disposition = self.disposition_for(&outcome);
        if let Err(e) = &outcome {
            error!(
                delivery_tag = tag,
                error = %e,
                disposition = ?disposition,
                "Failed to process message"
            );
        }

        let settled = match disposition {
            Disposition::Ack => delivery.ack().await,
            Disposition::Requeue => delivery.reject(true).await,
            Disposition::Discard => delivery.reject(false).await,
        };
        if let Err(e) = settled {
            error!(delivery_tag = tag, error = %e, "Failed to settle delivery");
        }
        disposition
    }

    async fn subscribe(&self) -> Result<(Box<dyn BrokerChannel>, DeliveryStream), PipelineError> {
        let conn = self.connections.acquire_connection().await?;
        let channel = conn.open_channel().await?;
        channel.set_prefetch(self.prefetch).await?;
        channel.declare_durable_queue(&self.queue_name).await?;
        let deliveries = channel.consume(&self.queue_name, &self.consumer_tag).await?;
        Ok((channel, deliveries))
    }

    /// Handle deliveries one at a time so they settle in delivery order. The
    /// prefetch bound still lets the broker push ahead of the handler.
    async fn drain(&self, mut deliveries: DeliveryStream) {
        while let Some(delivery) = deliveries.next().await {
            match delivery {
                Ok(delivery) => {
                    self.set_state(ConsumerState::Processing);
                    self.process(delivery.as_ref()).await;
                    self.set_state(ConsumerState::Listening);
                }
                Err(e) => error!(error = %e, "Consumer delivery error"),
            }
        }
    }

    fn set_state(&self, next: ConsumerState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = ?*current, to = ?next, "Consumer state change");
                *current = next;
                true
            }
        });
    }
}
