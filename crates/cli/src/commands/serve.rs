//! `chartwise serve` — Start the HTTP gateway.

use chartwise_config::AppConfig;
use tracing::info;

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    println!("📈 Chartwise Gateway");
    println!("   Listening:    {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:        {}", config.model);
    println!("   Tool servers: {}", config.tool_servers.len());

    chartwise_gateway::start(config).await?;
    info!("Gateway stopped");

    Ok(())
}
