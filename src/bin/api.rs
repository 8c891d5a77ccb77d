use financial_filings_qa::{agent::Orchestrator, api::start_server, config::AppConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Financial Filings QA - API Server");
    info!(
        port = config.port,
        model = %config.gemini_model,
        index_dir = %config.index_dir.display(),
        "Configuration loaded"
    );

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    info!("Orchestrator initialized");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
