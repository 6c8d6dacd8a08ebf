//! # Orderflow Messaging Module
//!
//! Broker connection and delivery layer shared by both services.
//!
//! ## Features
//! - Endpoint resolution with container-friendly fallbacks for loopback hosts
//! - One shared connection, acquired with per-candidate retries and backoff
//! - Best-effort publishing of persistent messages to a durable queue
//! - Consumer loop with prefetch bound and explicit ack / requeue / discard

pub mod amqp;
pub mod connection;
pub mod consumer;
pub mod endpoint;
pub mod memory;
pub mod publisher;
pub mod transport;

pub use amqp::AmqpConnector;
pub use connection::ConnectionManager;
pub use consumer::{
    ConsumerLoop, ConsumerState, Disposition, FailurePolicy, LogNotifier, MessageHandler,
    OrderNotificationHandler, OrderNotifier,
};
pub use endpoint::{BrokerAddress, EndpointResolver};
pub use memory::MemoryBroker;
pub use publisher::OrderPublisher;
pub use transport::{
    BrokerChannel, BrokerConnection, Connector, Delivery, DeliveryStream, MessageEnvelope,
};
