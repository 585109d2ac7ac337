mod config;
mod error;
mod models;
mod pipeline;
mod shutdown;
mod sources;
mod startup;
mod store;
mod utils;

use tracing::info;

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize logging
    startup::init_logging()?;

    info!("Starting daysched");

    // Load configuration
    let config = startup::load_config().await?;

    // Start the reconciliation service
    startup::start_service(config).await
}
