//! Orderflow Library
//!
//! Order intake and notification services joined by a durable RabbitMQ queue.
//! The interesting part is the broker layer in [`messaging`]: candidate address
//! fallback, a single shared connection, best-effort publishing and an
//! explicitly acknowledging consumer.

pub mod api;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod shutdown;
pub mod store;
pub mod types;

pub use error::{MessagingError, PipelineError, StoreError};
pub use messaging::{ConnectionManager, ConsumerLoop, EndpointResolver, OrderPublisher};
pub use types::{OrderCreatedEvent, ServiceConfig};

/// Durable queue carrying order events
pub const ORDERS_QUEUE: &str = "orders_queue";

/// Connection attempts per candidate address
pub const DEFAULT_RETRIES_PER_CANDIDATE: u32 = 2;

/// Pause between attempts on one candidate (1s)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Bound on a single connection attempt (5s)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Bound on a whole publish call (5s)
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;

/// Unacknowledged deliveries a consumer may hold
pub const DEFAULT_PREFETCH: u16 = 10;

/// Host-escape name, then the compose service name
pub const DEFAULT_ALTERNATE_HOSTS: &[&str] = &["host.docker.internal", "rabbitmq"];

pub const DEFAULT_STORE_URI: &str = "mongodb://localhost:27017";

pub const DEFAULT_STORE_DB: &str = "orders_db";

pub const DEFAULT_HTTP_PORT: u16 = 8000;
