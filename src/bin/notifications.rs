//! Notifications Service - Main Entry Point
//!
//! Consumes order events from the orders queue and emits a notification for
//! each. Exits 0 on interrupt, 1 when configuration is missing or the broker
//! cannot be reached at startup.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use orderflow::logging::init_tracing;
use orderflow::messaging::{
    AmqpConnector, ConnectionManager, ConsumerLoop, LogNotifier, OrderNotificationHandler,
};
use orderflow::shutdown::shutdown_signal;
use orderflow::types::ServiceConfig;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("orderflow=info,notifications=info");
    dotenvy::dotenv().ok();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Starting Notifications Service v{}", env!("CARGO_PKG_VERSION"));

    let connector = Arc::new(AmqpConnector::new().with_connection_name("notifications"));
    let connections = Arc::new(ConnectionManager::new(&config.broker, connector));
    let handler = Arc::new(OrderNotificationHandler::new(Arc::new(LogNotifier)));
    let consumer = ConsumerLoop::new(connections, handler, &config.broker, &config.consumer);

    match consumer.run(shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Consumer terminated");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
