//! In-memory order store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::OrderStore;
use crate::error::StoreError;
use crate::types::{NewOrder, OrderRecord, StoreSettings};

/// Order store backed by a `HashMap`.
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, OrderRecord>>,
    settings: StoreSettings,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Where this store claims to live, for diagnostics.
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Number of stored orders.
    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new(StoreSettings::default())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let record = OrderRecord::from_new(id.clone(), order);
        self.orders.write().await.insert(id.clone(), record);
        debug!(order_id = %id, database = %self.settings.database, "Order stored");
        Ok(id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self.orders.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn order() -> NewOrder {
        NewOrder {
            customer_name: "Ada".to_string(),
            product_id: "sku-1".to_string(),
            quantity: 2,
            note: Some("gift wrap".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryOrderStore::default();
        let id = store.insert(order()).await.unwrap();

        let found = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.customer_name, "Ada");
        assert_eq!(found.note.as_deref(), Some("gift wrap"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_missing_is_none() {
        let store = InMemoryOrderStore::default();
        let a = store.insert(order()).await.unwrap();
        let b = store.insert(order()).await.unwrap();
        assert_ne!(a, b);
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }
}
