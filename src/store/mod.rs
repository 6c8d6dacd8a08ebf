//! Order persistence.

mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{NewOrder, OrderRecord};

pub use memory::InMemoryOrderStore;

/// Document store holding orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist an order and return its generated id.
    async fn insert(&self, order: NewOrder) -> Result<String, StoreError>;

    /// Look an order up by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<OrderRecord>, StoreError>;
}
