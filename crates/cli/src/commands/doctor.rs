//! `chartwise doctor` — Diagnose configuration, credentials and tool servers.

use std::time::{Duration, Instant};

use chartwise_config::AppConfig;
use chartwise_core::provider::Provider;
use chartwise_mcp::{ConnectorState, ToolServerConnector, ToolServerSpec};
use chartwise_providers::OpenAiCompatProvider;
use tokio::time::timeout;

/// How long a freshly started tool server must stay up.
const SETTLE_TIME: Duration = Duration::from_millis(300);

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Chartwise Doctor — System Diagnostics");
    println!("========================================\n");

    let mut issues = 0;

    // Config
    let config_path = AppConfig::config_path();
    if !config_path.exists() {
        println!("  ⚠️  No config file at {} — using defaults (run `chartwise init`)", config_path.display());
    }
    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  1 issue found. Fix the config file and run again.");
            return Ok(());
        }
    };

    // Credential and model API
    match &config.api_key {
        Some(key) => {
            println!("  ✅ API key configured");
            match OpenAiCompatProvider::new("openai", &config.base_url, key.clone()) {
                Ok(provider) => match provider.health_check().await {
                    Ok(true) => println!("  ✅ Model API reachable at {}", config.base_url),
                    Ok(false) => {
                        println!("  ❌ Model API at {} rejected the request", config.base_url);
                        issues += 1;
                    }
                    Err(e) => {
                        println!("  ❌ Model API check failed: {e}");
                        issues += 1;
                    }
                },
                Err(e) => {
                    println!("  ❌ Could not build model client: {e}");
                    issues += 1;
                }
            }
        }
        None => {
            println!("  ❌ No API key — set CHARTWISE_API_KEY or OPENAI_API_KEY");
            issues += 1;
        }
    }

    // Tool servers
    if config.tool_servers.is_empty() {
        println!("  ⚠️  No tool servers configured");
        issues += 1;
    }
    for server in &config.tool_servers {
        let spec = ToolServerSpec::from(server);
        let started = Instant::now();
        match ToolServerConnector::start(spec).await {
            Ok(connector) => {
                let elapsed = started.elapsed().as_millis();
                // A server that dies right after the handshake would fail every call.
                let mut state = connector.subscribe();
                let early_exit = timeout(
                    SETTLE_TIME,
                    state.wait_for(|s| matches!(s, ConnectorState::Failed { .. })),
                )
                .await
                .is_ok_and(|changed| changed.is_ok());

                if early_exit {
                    println!(
                        "  ❌ Tool server '{}' exited right after the handshake ({})",
                        server.name,
                        connector.state()
                    );
                    issues += 1;
                } else {
                    println!(
                        "  ✅ Tool server '{}' started in {elapsed}ms with {} capabilities",
                        server.name,
                        connector.list_capabilities().len()
                    );
                }
                connector.stop().await;
            }
            Err(e) => {
                println!("  ❌ {e}");
                issues += 1;
            }
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
