//! Order types and request/response definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Incoming order creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    pub product_id: String,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CreateOrderRequest {
    /// Check the request, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.customer_name.trim().is_empty() {
            return Err("customer_name must not be empty".to_string());
        }
        if self.product_id.trim().is_empty() {
            return Err("product_id must not be empty".to_string());
        }
        if self.quantity <= 0 {
            return Err("quantity must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Stamp the request with its creation time.
    pub fn into_new_order(self, created_at: DateTime<Utc>) -> NewOrder {
        NewOrder {
            customer_name: self.customer_name,
            product_id: self.product_id,
            quantity: self.quantity,
            note: self.note,
            created_at,
        }
    }
}

/// An order ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub customer_name: String,
    pub product_id: String,
    pub quantity: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub customer_name: String,
    pub product_id: String,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Attach a store-generated id to a new order.
    pub fn from_new(id: String, order: NewOrder) -> Self {
        Self {
            id,
            customer_name: order.customer_name,
            product_id: order.product_id,
            quantity: order.quantity,
            note: order.note,
            created_at: order.created_at,
        }
    }

    /// Convert to response type.
    pub fn to_response(&self) -> OrderResponse {
        OrderResponse {
            id: self.id.clone(),
            customer_name: self.customer_name.clone(),
            product_id: self.product_id.clone(),
            quantity: self.quantity,
            created_at: self.created_at,
        }
    }
}

/// Order as returned to HTTP callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_name: String,
    pub product_id: String,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

/// Body of the message published on the orders queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: String,
}

impl OrderCreatedEvent {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
        }
    }
}
