//! Broker transport abstraction.
//!
//! The connection manager, publisher and consumer only see these traits. The
//! AMQP backend lives in `amqp`, the in-process broker in `memory`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::endpoint::BrokerAddress;
use crate::error::MessagingError;

/// Stream of deliveries produced by a consumer subscription.
pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>, MessagingError>>;

/// A message as handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Opaque body
    pub payload: Vec<u8>,

    /// Survive broker restarts (delivery mode 2)
    pub persistent: bool,

    /// MIME type of the payload
    pub content_type: Option<String>,
}

impl MessageEnvelope {
    /// A persistent JSON message.
    pub fn persistent_json(payload: Vec<u8>) -> Self {
        Self {
            payload,
            persistent: true,
            content_type: Some("application/json".to_string()),
        }
    }
}

/// Opens connections to a broker address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &BrokerAddress,
    ) -> Result<Arc<dyn BrokerConnection>, MessagingError>;
}

/// A live session to the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Local check only: not closed and no transport failure observed.
    fn is_alive(&self) -> bool;

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, MessagingError>;

    async fn close(&self) -> Result<(), MessagingError>;
}

/// A channel multiplexed over a connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Bound the number of unacknowledged deliveries on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), MessagingError>;

    /// Declare a durable queue. Repeated declarations are no-ops.
    async fn declare_durable_queue(&self, name: &str) -> Result<(), MessagingError>;

    /// Publish on the default exchange, routed by `routing_key`.
    async fn publish(
        &self,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), MessagingError>;

    /// Subscribe to a queue with explicit acknowledgement.
    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, MessagingError>;

    async fn close(&self) -> Result<(), MessagingError>;
}

/// A message delivered to a consumer, awaiting settlement.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    /// Remove the message from the queue.
    async fn ack(&self) -> Result<(), MessagingError>;

    /// Return the message to the queue, or drop it when `requeue` is false.
    async fn reject(&self, requeue: bool) -> Result<(), MessagingError>;
}
