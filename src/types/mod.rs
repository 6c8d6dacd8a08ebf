//! Core types for the order pipeline.

mod config;
mod order;

pub use config::{BrokerSettings, ConsumerSettings, ServiceConfig, StoreSettings};
pub use order::{CreateOrderRequest, NewOrder, OrderCreatedEvent, OrderRecord, OrderResponse};
