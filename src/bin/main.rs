use financial_filings_qa::{agent::Orchestrator, config::AppConfig, models::Answer};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CLI_SESSION_KEY: &str = "cli";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: fdqa <question>");
        eprintln!("example: fdqa How much revenue did Apple generate in Q1 2024?");
        std::process::exit(2);
    }

    let config = AppConfig::from_env()?;
    let orchestrator = Orchestrator::from_config(&config)?;

    info!(query = %query, "Answering query");
    let result = orchestrator.answer(&query, CLI_SESSION_KEY, "").await;

    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }

    match &result.answer {
        Answer::Text(text) => println!("{}", text),
        Answer::Chart(spec) => println!("{}", serde_json::to_string_pretty(spec)?),
    }
    println!();
    println!("category: {}", result.category);
    println!("tokens: {}  elapsed: {} ms", result.tokens, result.elapsed_ms);

    if result.is_error() {
        std::process::exit(1);
    }
    Ok(())
}
