//! HTTP request handlers for the orders service.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::error::StoreError;
use crate::messaging::OrderPublisher;
use crate::store::OrderStore;
use crate::types::{CreateOrderRequest, OrderResponse};

/// Application state shared across handlers.
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub publisher: Arc<OrderPublisher>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// Health check endpoint.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Error body returned to HTTP callers.
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Handler failure mapped to a status code.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Validation(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            ApiError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

/// Create an order, then announce it on the orders queue.
///
/// The announcement is best effort: the caller gets 201 as soon as the order
/// is stored, whether or not the broker took the message.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    request.validate().map_err(ApiError::Validation)?;

    let order_id = state
        .store
        .insert(request.into_new_order(Utc::now()))
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to store order");
            ApiError::from(e)
        })?;

    state.publisher.publish_order_created(&order_id).await;

    let created = state
        .store
        .find_by_id(&order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found after creation")))?;

    info!(order_id = %order_id, "Order created");
    Ok((StatusCode::CREATED, Json(created.to_response())))
}

/// Fetch an order by id.
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    match state.store.find_by_id(&order_id).await? {
        Some(order) => Ok(Json(order.to_response())),
        None => Err(ApiError::NotFound(format!("Order {order_id} not found"))),
    }
}

/// Log request latency and expose it as `X-Process-Time-ms`.
pub async fn record_process_time(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(
        method = %method,
        path = %path,
        elapsed_ms,
        "Request completed"
    );
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed_ms:.2}")) {
        response.headers_mut().insert("x-process-time-ms", value);
    }
    response
}
