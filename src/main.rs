//! Orders Service - Main Entry Point
//!
//! Accepts orders over HTTP, stores them, and announces each one on the
//! orders queue.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use orderflow::api::{self, AppState};
use orderflow::logging::init_tracing;
use orderflow::messaging::{AmqpConnector, ConnectionManager, OrderPublisher};
use orderflow::shutdown::shutdown_signal;
use orderflow::store::{InMemoryOrderStore, OrderStore};
use orderflow::types::ServiceConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("orderflow=info,orders_service=info,tower_http=debug");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ServiceConfig::from_env()?;

    info!("Starting Orders Service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        store_uri = %config.store.uri,
        store_db = %config.store.database,
        queue = %config.broker.queue_name,
        "Configuration loaded"
    );

    // Initialize components
    let connector = Arc::new(AmqpConnector::new().with_connection_name("orders-service"));
    let connections = Arc::new(ConnectionManager::new(&config.broker, connector));
    let publisher = Arc::new(OrderPublisher::new(Arc::clone(&connections), &config.broker));
    let store: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new(config.store.clone()));

    let state = Arc::new(AppState { store, publisher });
    let app = api::router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = connections.close().await {
        warn!(error = %e, "Failed to close broker connection");
    }
    info!("Orders Service stopped");
    Ok(())
}
