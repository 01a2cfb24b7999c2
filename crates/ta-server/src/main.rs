//! `chartwise-ta-server` — technical-analysis tools over MCP stdio.
//!
//! stdout carries the protocol, so all logging goes to stderr.

use anyhow::Context;
use chartwise_ta_server::{McpServer, PAGE_SIZE_ENV, default_tools, price_source_from_env};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    let prices = price_source_from_env(|key| std::env::var(key).ok())
        .context("failed to set up the price source")?;
    tracing::info!(source = prices.name(), "Price source selected");

    let mut server = McpServer::new("technicalanalysisserver", default_tools(prices));
    if let Ok(size) = std::env::var(PAGE_SIZE_ENV) {
        let size: usize = size
            .parse()
            .with_context(|| format!("{PAGE_SIZE_ENV} must be a positive integer"))?;
        server = server.with_page_size(size);
    }

    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("stdio transport failed")?;
    Ok(())
}
