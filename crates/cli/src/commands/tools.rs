//! `chartwise tools` — Launch the configured tool servers and list what
//! they offer.

use chartwise_config::AppConfig;
use chartwise_mcp::{ServerScope, ToolServerSpec, build_registry};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let specs: Vec<ToolServerSpec> = config.tool_servers.iter().map(ToolServerSpec::from).collect();

    if specs.is_empty() {
        println!("No tool servers configured.");
        return Ok(());
    }

    let scope = ServerScope::start_all(&specs).await?;

    for connector in scope.connectors() {
        let version = connector
            .server_info()
            .map(|info| format!("{} {}", info.name, info.version))
            .unwrap_or_else(|| "unknown server".into());
        println!("🔌 {} ({version})", connector.name());

        for capability in connector.list_capabilities() {
            println!("   • {} — {}", capability.name, capability.description);
            let params = capability.parameter_names();
            if !params.is_empty() {
                println!("     params: {}", params.join(", "));
            }
        }
    }

    let collision = build_registry(scope.connectors()).err();
    scope.stop_all().await;

    if let Some(e) = collision {
        println!();
        println!("⚠️  {e}");
    }
    Ok(())
}
