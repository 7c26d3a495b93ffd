use std::sync::Arc;

use anyhow::Result;
use trunk_queue::observability::init_tracing;
use trunk_worker::{LoggingServices, WorkerApp, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    init_tracing(config.log_json);

    let app = WorkerApp::build(config, Arc::new(LoggingServices)).await?;
    let running = app.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    running.shutdown().await?;
    Ok(())
}
